use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use ckv_client::{ClientConfig, KVClient};
use ckv_common::{CkvError, Order, Script, ScriptReply, Store, TtlStatus};

type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

fn spawn_server(expected_commands: usize, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(invalid("missing crlf"));
        }
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn reply(stream: &mut TcpStream, raw: &[u8]) {
    let _ = stream.write_all(raw);
    let _ = stream.flush();
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    };
    KVClient::with_config(config).expect("client")
}

fn strs(args: &[Vec<u8>]) -> Vec<&str> {
    args.iter()
        .map(|arg| std::str::from_utf8(arg).expect("utf8"))
        .collect()
}

#[test]
fn conditional_set_sends_px_and_nx() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(strs(&args), ["SET", "lock", "\"me\"", "PX", "1500", "NX"]);
            reply(stream, b"+OK\r\n");
        } else {
            assert_eq!(strs(&args), ["SET", "lock", "\"you\"", "PX", "1500", "NX"]);
            reply(stream, b"$-1\r\n");
        }
    });

    let client = client_with_addr(addr);
    let ttl = Some(Duration::from_millis(1500));
    assert!(client.set_if_absent(b"lock", b"\"me\"", ttl).expect("first"));
    assert!(!client.set_if_absent(b"lock", b"\"you\"", ttl).expect("second"));
}

#[test]
fn sub_millisecond_ttl_rounds_up_on_the_wire() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(strs(&args), ["SET", "lock", "v", "PX", "1", "NX"]);
            reply(stream, b"+OK\r\n");
        } else {
            assert_eq!(strs(&args), ["PEXPIRE", "lock", "1"]);
            reply(stream, b":1\r\n");
        }
    });

    let client = client_with_addr(addr);
    let ttl = Duration::from_micros(500);
    assert!(client.set_if_absent(b"lock", b"v", Some(ttl)).expect("set"));
    assert!(client.expire(b"lock", ttl).expect("expire"));
}

#[test]
fn set_if_present_without_ttl_sends_xx() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(strs(&args), ["SET", "k", "v", "XX"]);
        reply(stream, b"+OK\r\n");
    });

    let client = client_with_addr(addr);
    assert!(client.set_if_present(b"k", b"v", None).expect("set"));
}

#[test]
fn get_and_pttl_mapping() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(strs(&args), ["GET", "key"]);
            reply(stream, b"$5\r\nvalue\r\n");
        }
        1 => {
            assert_eq!(strs(&args), ["PTTL", "key"]);
            reply(stream, b":2500\r\n");
        }
        2 => {
            assert_eq!(strs(&args), ["PTTL", "key"]);
            reply(stream, b":-1\r\n");
        }
        _ => {
            assert_eq!(strs(&args), ["PTTL", "gone"]);
            reply(stream, b":-2\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert_eq!(client.get(b"key").expect("get"), Some(b"value".to_vec()));
    assert_eq!(
        client.ttl(b"key").expect("ttl"),
        TtlStatus::ExpiresIn(Duration::from_millis(2500))
    );
    assert_eq!(client.ttl(b"key").expect("ttl"), TtlStatus::NoExpiry);
    assert_eq!(client.ttl(b"gone").expect("ttl"), TtlStatus::Missing);
}

#[test]
fn rename_missing_source_is_false() {
    let addr = spawn_server(2, |idx, args, stream| {
        assert_eq!(strs(&args)[0], "RENAMENX");
        if idx == 0 {
            reply(stream, b"-ERR no such key\r\n");
        } else {
            reply(stream, b":1\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert!(!client.rename_if_absent(b"old", b"new").expect("missing"));
    assert!(client.rename_if_absent(b"old", b"new").expect("renamed"));
}

#[test]
fn eval_sends_numkeys_then_keys_then_args() {
    let addr = spawn_server(1, |_, args, stream| {
        let args = strs(&args);
        assert_eq!(args[0], "EVAL");
        assert_eq!(args[1], ckv_common::COMPARE_AND_DELETE);
        assert_eq!(&args[2..], ["1", "lock", "\"owner\""]);
        reply(stream, b":1\r\n");
    });

    let client = client_with_addr(addr);
    let result = client
        .eval(&Script::compare_and_delete(), &[b"lock"], &[b"\"owner\""])
        .expect("eval");
    assert_eq!(result, ScriptReply::Integer(1));
}

#[test]
fn ranked_set_commands() {
    let addr = spawn_server(5, |idx, args, stream| match idx {
        0 => {
            assert_eq!(strs(&args), ["ZADD", "board", "2.5", "alice"]);
            reply(stream, b":1\r\n");
        }
        1 => {
            assert_eq!(strs(&args), ["ZREVRANGE", "board", "0", "-1"]);
            reply(stream, b"*2\r\n$3\r\nbob\r\n$5\r\nalice\r\n");
        }
        2 => {
            assert_eq!(strs(&args), ["ZINCRBY", "board", "5", "alice"]);
            reply(stream, b"$3\r\n7.5\r\n");
        }
        3 => {
            assert_eq!(strs(&args), ["ZCOUNT", "board", "-inf", "+inf"]);
            reply(stream, b":2\r\n");
        }
        _ => {
            assert_eq!(strs(&args), ["ZRANK", "board", "carol"]);
            reply(stream, b"$-1\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert!(client.zadd(b"board", b"alice", 2.5).expect("zadd"));
    assert_eq!(
        client.zrange(b"board", 0, -1, Order::Descending).expect("zrevrange"),
        vec![b"bob".to_vec(), b"alice".to_vec()]
    );
    assert_eq!(client.zincrby(b"board", b"alice", 5.0).expect("zincrby"), 7.5);
    assert_eq!(
        client
            .zcount(b"board", f64::NEG_INFINITY, f64::INFINITY)
            .expect("zcount"),
        2
    );
    assert_eq!(client.zrank(b"board", b"carol", Order::Ascending).expect("zrank"), None);
}

#[test]
fn counters_and_bits() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(strs(&args), ["INCRBY", "hits", "3"]);
            reply(stream, b":3\r\n");
        }
        1 => {
            assert_eq!(strs(&args), ["DECRBY", "hits", "1"]);
            reply(stream, b":2\r\n");
        }
        2 => {
            assert_eq!(strs(&args), ["SETBIT", "seen", "7", "1"]);
            reply(stream, b":0\r\n");
        }
        _ => {
            assert_eq!(strs(&args), ["BITCOUNT", "seen"]);
            reply(stream, b":1\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert_eq!(client.increment_by(b"hits", 3).expect("incr"), 3);
    assert_eq!(client.decrement_by(b"hits", 1).expect("decr"), 2);
    assert!(!client.set_bit(b"seen", 7, true).expect("setbit"));
    assert_eq!(client.bit_count(b"seen").expect("bitcount"), 1);
}

#[test]
fn server_error_is_operation_failed() {
    let addr = spawn_server(1, |_, _, stream| {
        reply(
            stream,
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        );
    });

    let client = client_with_addr(addr);
    let err = client.increment_by(b"board", 1).unwrap_err();
    assert!(matches!(err, CkvError::OperationFailed { .. }));
}

#[test]
fn refused_connection_is_store_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let client = client_with_addr(addr);
    let err = client.exists(b"key").unwrap_err();
    assert!(err.is_unavailable());
}

#[test]
fn garbled_reply_is_operation_failed() {
    let addr = spawn_server(1, |_, _, stream| {
        reply(stream, b"?garbage\r\n");
    });

    let client = client_with_addr(addr);
    let err = client.exists(b"key").unwrap_err();
    assert!(matches!(err, CkvError::OperationFailed { .. }));
}

#[test]
fn closed_connection_is_store_unavailable() {
    let addr = spawn_server(1, |_, _, stream| {
        let _ = stream.shutdown(Shutdown::Both);
    });

    let client = client_with_addr(addr);
    let err = client.get(b"key").unwrap_err();
    assert!(err.is_unavailable());
}
