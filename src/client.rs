//! Demo client harness.
//!
//! Mirrors the usage pattern the server must tolerate: several small
//! writes per request with no length indication beyond the terminator,
//! then reading the reply until the server closes the connection. The
//! concurrent variant gates all clients on a shared barrier so they fire
//! at once.

use crate::codec;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Barrier};
use std::thread;

/// Send one request as separate percent-encoded fragments and read the
/// decoded reply to EOF.
///
/// The caller is responsible for including the terminator in (or across)
/// the fragments; without it the server never replies.
pub fn request(addr: SocketAddr, fragments: &[&str]) -> io::Result<String> {
    let mut stream = TcpStream::connect(addr)?;
    for fragment in fragments {
        stream.write_all(codec::encode(fragment).as_bytes())?;
        stream.flush()?;
    }

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    codec::decode(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Fire `clients` concurrent requests, each split into two fragments with
/// the terminator in the second, and collect the replies.
///
/// All clients connect first, then release together on a shared barrier.
pub fn concurrent_requests(addr: SocketAddr, clients: usize) -> Vec<io::Result<String>> {
    let barrier = Arc::new(Barrier::new(clients));
    let mut handles = Vec::with_capacity(clients);

    for index in 0..clients {
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let mut stream = TcpStream::connect(addr)?;
            barrier.wait();

            let first = format!("this is client {index}, fragment one. ");
            let second = format!("this is client {index}, fragment two. over");
            stream.write_all(codec::encode(&first).as_bytes())?;
            stream.flush()?;
            stream.write_all(codec::encode(&second).as_bytes())?;
            stream.flush()?;

            let mut raw = Vec::new();
            stream.read_to_end(&mut raw)?;
            codec::decode(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }));
    }

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "client thread panicked",
            )),
        })
        .collect()
}
