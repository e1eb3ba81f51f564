//! End-to-end happy path: a client dials a server, both sides log a
//! handshake, and a single payload crosses in each direction with clean
//! statistics.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use msgsock::{Connection, DefaultLogger, InboundHandler, SocketConfig};

fn logger() -> Arc<dyn msgsock::Logger> {
    Arc::new(DefaultLogger)
}

fn config() -> SocketConfig {
    SocketConfig::new().with_socket_timeout(Duration::from_millis(500))
}

#[test]
fn ping_pong_with_clean_statistics() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let server_received_clone = server_received.clone();

    let server_thread = thread::spawn(move || {
        let (stream, peer_addr) = listener.accept().unwrap();
        let poll_handle = server_received_clone.clone();
        let handler: InboundHandler = Arc::new(move |_ref, payload| {
            server_received_clone.lock().unwrap().push(payload.to_string());
        });
        let conn = Arc::new(
            Connection::accept(stream, peer_addr, "server".into(), &config(), logger(), Some(handler), None)
                .unwrap(),
        );
        conn.start();
        for _ in 0..50 {
            if !poll_handle.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        conn.send("pong");
        thread::sleep(Duration::from_millis(100));
        conn.stop();
    });

    let client_received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let client_received_clone = client_received.clone();
    let handler: InboundHandler = Arc::new(move |_ref, payload| {
        client_received_clone.lock().unwrap().push(payload.to_string());
    });
    let client = Arc::new(
        Connection::connect("127.0.0.1", addr.port(), &config(), logger(), Some(handler), None).unwrap(),
    );
    assert!(client.is_connected());
    client.start();
    client.send("ping");

    for _ in 0..50 {
        if !client_received.lock().unwrap().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    client.stop();
    server_thread.join().unwrap();

    assert_eq!(*server_received.lock().unwrap(), vec!["ping".to_string()]);
    assert_eq!(*client_received.lock().unwrap(), vec!["pong".to_string()]);
}

#[test]
fn dial_against_non_listening_port_leaves_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Connection::connect(
        "127.0.0.1",
        addr.port(),
        &SocketConfig::new().with_socket_timeout(Duration::from_millis(300)),
        logger(),
        None,
        None,
    );
    assert!(result.is_err());
}
