//! End-to-end tests driving a real loopback `TcpStream` against a running
//! `ServerSpec`, covering the six scenarios in SPEC_FULL.md §8. These write
//! raw FastCGI wire bytes directly (no access to the crate's internal
//! codec) so the test itself acts as an independent client implementation.

use fastcgi_responder::{ServerSpec, SCRIPT_FILENAME_HEADER};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const VERSION: u8 = 1;
const BEGIN_REQUEST: u8 = 1;
const END_REQUEST: u8 = 3;
const PARAMS: u8 = 4;
const STDIN: u8 = 5;
const STDOUT: u8 = 6;
const UNKNOWN_TYPE: u8 = 11;

const ROLE_RESPONDER: u16 = 1;
const ROLE_AUTHORIZER: u16 = 2;
const KEEP_CONN: u8 = 1;

fn pad_len(content_len: usize) -> u8 {
    ((8 - (content_len % 8)) % 8) as u8
}

fn write_record(stream: &mut TcpStream, type_id: u8, request_id: u16, content: &[u8]) {
    assert!(content.len() <= 0xFFFF);
    let padding = pad_len(content.len());
    stream.write_all(&[VERSION, type_id]).unwrap();
    stream.write_all(&request_id.to_be_bytes()).unwrap();
    stream.write_all(&(content.len() as u16).to_be_bytes()).unwrap();
    stream.write_all(&[padding, 0]).unwrap();
    stream.write_all(content).unwrap();
    stream.write_all(&vec![0u8; padding as usize]).unwrap();
}

fn write_begin_request(stream: &mut TcpStream, request_id: u16, role: u16, flags: u8) {
    let mut body = Vec::new();
    body.extend_from_slice(&role.to_be_bytes());
    body.push(flags);
    body.extend_from_slice(&[0u8; 5]);
    write_record(stream, BEGIN_REQUEST, request_id, &body);
}

/// Short-form (length < 128) name/value pair encoding only — sufficient for
/// these test vectors.
fn encode_params(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in pairs {
        assert!(name.len() < 128 && value.len() < 128);
        out.push(name.len() as u8);
        out.push(value.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

struct Record {
    type_id: u8,
    request_id: u16,
    content: Vec<u8>,
}

fn read_record(stream: &mut TcpStream) -> Record {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).unwrap();
    let [version, type_id, id1, id0, len1, len0, padding, _reserved] = header;
    assert_eq!(version, VERSION);
    let request_id = u16::from_be_bytes([id1, id0]);
    let content_length = u16::from_be_bytes([len1, len0]) as usize;
    let mut content = vec![0u8; content_length];
    stream.read_exact(&mut content).unwrap();
    let mut padding_buf = vec![0u8; padding as usize];
    stream.read_exact(&mut padding_buf).unwrap();
    Record {
        type_id,
        request_id,
        content,
    }
}

/// Reads records for `request_id` until its `END_REQUEST`, returning the
/// concatenated `STDOUT` body and the `(app_status, protocol_status)` pair.
fn read_until_end_request(stream: &mut TcpStream, request_id: u16) -> (Vec<u8>, u32, u8) {
    let mut stdout = Vec::new();
    loop {
        let record = read_record(stream);
        assert_eq!(record.request_id, request_id);
        match record.type_id {
            STDOUT => stdout.extend(record.content),
            END_REQUEST => {
                let app_status = u32::from_be_bytes(record.content[0..4].try_into().unwrap());
                let protocol_status = record.content[4];
                return (stdout, app_status, protocol_status);
            }
            other => panic!("unexpected record type {other} while waiting for END_REQUEST"),
        }
    }
}

fn start_echo_server() -> fastcgi_responder::ServerHandle {
    ServerSpec::new(|request, mut response| {
        let mut body = Vec::new();
        let _ = request.body.read_to_end(&mut body).ok();
        if body.is_empty() {
            let _ = response.write(b"hello");
        } else {
            let _ = response.write(&body);
        }
        let _ = response.flush();
    })
    .start("127.0.0.1:0".parse().unwrap())
    .unwrap()
}

fn connect(handle: &fastcgi_responder::ServerHandle) -> TcpStream {
    let stream = TcpStream::connect(handle.address()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

#[test]
fn minimal_get_returns_default_status_and_body() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    write_begin_request(&mut stream, 1, ROLE_RESPONDER, 0);
    let params = encode_params(&[
        ("REQUEST_METHOD", "GET"),
        ("SERVER_PROTOCOL", "HTTP/1.1"),
        ("REQUEST_URI", "/hi"),
        ("HTTP_HOST", "x"),
    ]);
    write_record(&mut stream, PARAMS, 1, &params);
    write_record(&mut stream, PARAMS, 1, &[]);
    write_record(&mut stream, STDIN, 1, &[]);

    let (body, app_status, protocol_status) = read_until_end_request(&mut stream, 1);
    let body = String::from_utf8(body).unwrap();
    assert!(body.starts_with("Status: 200 OK\r\n"));
    assert!(body.contains("Content-Type: text/plain; charset=utf-8"));
    assert!(body.ends_with("hello"));
    assert_eq!(app_status, 0);
    assert_eq!(protocol_status, 0);

    drop(stream);
    handle.stop();
}

#[test]
fn unsupported_role_is_rejected_without_dispatch() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    write_begin_request(&mut stream, 1, ROLE_AUTHORIZER, KEEP_CONN);
    let record = read_record(&mut stream);
    assert_eq!(record.type_id, END_REQUEST);
    assert_eq!(record.request_id, 1);
    assert_eq!(record.content[4], 3); // UNKNOWN_ROLE

    drop(stream);
    handle.stop();
}

#[test]
fn unknown_record_type_gets_unknown_type_reply() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    write_record(&mut stream, 42, 0, &[]);
    let record = read_record(&mut stream);
    assert_eq!(record.type_id, UNKNOWN_TYPE);
    assert_eq!(record.content[0], 42);
    assert_eq!(record.content.len(), 8);

    drop(stream);
    handle.stop();
}

#[test]
fn keep_alive_off_closes_connection_after_end_request() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    write_begin_request(&mut stream, 1, ROLE_RESPONDER, 0);
    write_record(&mut stream, PARAMS, 1, &encode_params(&[
        ("REQUEST_METHOD", "GET"),
        ("SERVER_PROTOCOL", "HTTP/1.1"),
    ]));
    write_record(&mut stream, PARAMS, 1, &[]);
    write_record(&mut stream, STDIN, 1, &[]);

    let (_body, _app_status, _protocol_status) = read_until_end_request(&mut stream, 1);

    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0, "connection should be closed after a non-keep-alive request completes");

    handle.stop();
}

#[test]
fn keep_alive_on_serves_two_sequential_requests() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    for id in [1u16, 2u16] {
        write_begin_request(&mut stream, id, ROLE_RESPONDER, KEEP_CONN);
        write_record(&mut stream, PARAMS, id, &encode_params(&[
            ("REQUEST_METHOD", "GET"),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
        ]));
        write_record(&mut stream, PARAMS, id, &[]);
        write_record(&mut stream, STDIN, id, &[]);

        let (_body, app_status, protocol_status) = read_until_end_request(&mut stream, id);
        assert_eq!(app_status, 0);
        assert_eq!(protocol_status, 0);
    }

    drop(stream);
    handle.stop();
}

#[test]
fn large_body_split_across_records_is_reassembled_without_reordering() {
    let handle = start_echo_server();
    let mut stream = connect(&handle);

    write_begin_request(&mut stream, 1, ROLE_RESPONDER, 0);
    write_record(&mut stream, PARAMS, 1, &encode_params(&[
        ("REQUEST_METHOD", "POST"),
        ("SERVER_PROTOCOL", "HTTP/1.1"),
    ]));
    write_record(&mut stream, PARAMS, 1, &[]);

    let total = 200_000usize;
    let payload: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
    for chunk in payload.chunks(0xFFFF) {
        write_record(&mut stream, STDIN, 1, chunk);
    }
    write_record(&mut stream, STDIN, 1, &[]);

    let (body, _app_status, _protocol_status) = read_until_end_request(&mut stream, 1);
    let split = body.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert_eq!(&body[split..], &payload[..]);

    drop(stream);
    handle.stop();
}
