//! Exercise `ModbusTcp` against a tiny in-test Modbus server.
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use rstest::rstest;
use saw_hardware::{HwError, ModbusTcp};
use saw_traits::FieldBus;

/// Serve one connection: registers read back as `start + i`, writes are
/// echoed, reads starting at 999 raise exception 0x02.
fn serve(mut s: TcpStream) {
    loop {
        let mut header = [0u8; 7];
        if s.read_exact(&mut header).is_err() {
            return;
        }
        let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0u8; len - 1];
        if s.read_exact(&mut pdu).is_err() {
            return;
        }
        let reply: Vec<u8> = match pdu[0] {
            0x03 => {
                let start = u16::from_be_bytes([pdu[1], pdu[2]]);
                let count = u16::from_be_bytes([pdu[3], pdu[4]]);
                if start == 999 {
                    vec![0x83, 0x02]
                } else {
                    let mut r = vec![0x03, (count * 2) as u8];
                    for i in 0..count {
                        r.extend_from_slice(&(start + i).to_be_bytes());
                    }
                    r
                }
            }
            0x06 => pdu.clone(),
            f => vec![f | 0x80, 0x01],
        };
        let mut frame = Vec::new();
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&reply);
        if s.write_all(&frame).is_err() {
            return;
        }
    }
}

fn start_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for conn in listener.incoming() {
            match conn {
                Ok(s) => {
                    thread::spawn(move || serve(s));
                }
                Err(_) => return,
            }
        }
    });
    port
}

fn client(port: u16) -> ModbusTcp {
    ModbusTcp::connect("127.0.0.1", port, 1, Duration::from_millis(500)).unwrap()
}

#[rstest]
#[case(0, 19)]
#[case(100, 1)]
#[case(40, 125)]
fn reads_holding_registers(#[case] start: u16, #[case] count: u16) {
    let port = start_server();
    let mut c = client(port);
    let regs = c.read_holding_registers(start, count).unwrap();
    assert_eq!(regs.len(), usize::from(count));
    assert_eq!(regs[0], start);
    assert_eq!(*regs.last().unwrap(), start + count - 1);
}

#[rstest]
fn write_single_register_keeps_link() {
    let port = start_server();
    let mut c = client(port);
    c.write_register(2041, 0x8000 | 1234).unwrap();
    c.write_register(2066, 900).unwrap();
    assert!(c.is_connected());
}

#[rstest]
fn exception_keeps_link_up() {
    let port = start_server();
    let mut c = client(port);
    let err = c.read_holding_registers(999, 2).unwrap_err();
    let hw = err.downcast_ref::<HwError>().expect("typed error");
    assert!(matches!(hw, HwError::Exception { function: 0x03, code: 0x02 }));
    assert!(c.is_connected());
    assert!(c.read_holding_registers(0, 2).is_ok());
}

#[rstest]
fn reconnect_restores_link() {
    let port = start_server();
    let mut c = ModbusTcp::new("127.0.0.1", port, 1, Duration::from_millis(500));
    assert!(!c.is_connected());
    c.reconnect().unwrap();
    assert!(c.is_connected());
    assert_eq!(c.read_holding_registers(5, 1).unwrap(), vec![5]);
}
