//! The two-process communication substrate.
//!
//! The benchmark runs as a pair of cooperating processes connected by a TCP
//! stream (with Nagle disabled). The leader listens, the follower connects;
//! beyond rendezvous the engine is role-agnostic.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use log::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Listens for the peer and sends in measured transfers.
    Leader,
    /// Connects to the leader and receives in measured transfers.
    Follower,
}

pub struct Peer {
    stream: TcpStream,
    role: Role,
}

impl Peer {
    /// Establishes the rendezvous. The follower retries until the leader's
    /// listener is up, so process start order does not matter.
    pub fn connect(role: Role, addr: &str) -> io::Result<Peer> {
        let stream = match role {
            Role::Leader => {
                let listener = TcpListener::bind(addr)?;
                info!("waiting for peer on {}", addr);
                let (stream, peer_addr) = listener.accept()?;
                info!("peer connected from {}", peer_addr);
                stream
            }
            Role::Follower => {
                let deadline = Instant::now() + CONNECT_TIMEOUT;
                loop {
                    match TcpStream::connect(addr) {
                        Ok(stream) => break stream,
                        Err(_) if Instant::now() < deadline => {
                            thread::sleep(Duration::from_millis(50));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };
        stream.set_nodelay(true)?;
        Ok(Peer { stream, role })
    }

    /// Barrier-style rendezvous: both sides send a byte and block until the
    /// peer's byte arrives.
    pub fn barrier(&mut self) -> io::Result<()> {
        self.stream.write_all(&[0xb5])?;
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte)
    }

    /// Zero-payload ping-pong, leader receiving first. Warms the
    /// send/receive instruction path right before a measured transfer.
    pub fn sync(&mut self) -> io::Result<()> {
        let mut byte = [0u8; 1];
        match self.role {
            Role::Leader => {
                self.stream.read_exact(&mut byte)?;
                self.stream.write_all(&[0x51])
            }
            Role::Follower => {
                self.stream.write_all(&[0x51])?;
                self.stream.read_exact(&mut byte)
            }
        }
    }

    /// The measured transfer: the leader sends `buf[..len]` and the follower
    /// receives into it.
    pub fn transfer(&mut self, buf: &mut [u8], len: usize) -> io::Result<()> {
        match self.role {
            Role::Leader => self.stream.write_all(&buf[..len]),
            Role::Follower => self.stream.read_exact(&mut buf[..len]),
        }
    }

    /// Repeated ping-pongs to warm the channel before the first measurement.
    pub fn warm_up(&mut self, rounds: u32) -> io::Result<()> {
        for _ in 0..rounds {
            self.sync()?;
        }
        Ok(())
    }
}
