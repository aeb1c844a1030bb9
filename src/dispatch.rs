use std::io::{self, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};

use tracing::{debug, warn};

use crate::protocol::LINE_END;

/// Identity of a peer for exclusion purposes: its descriptor.
pub type PeerId = RawFd;

/// Something a formatted line can be written to.
pub trait Peer {
    fn id(&self) -> PeerId;
    fn send(&self, frame: &[u8]) -> io::Result<()>;
}

impl Peer for TcpStream {
    fn id(&self) -> PeerId {
        self.as_raw_fd()
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut stream = self;
        stream.write_all(frame)
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every target got the line, or there was nobody to send to.
    Complete,
    Partial { delivered: usize, targets: usize },
    Failed,
}

fn frame(text: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(text.len() + LINE_END.len());
    frame.extend_from_slice(text.as_bytes());
    frame.extend_from_slice(LINE_END.as_bytes());
    frame
}

fn send_frame<P: Peer + ?Sized>(frame: &[u8], peer: &P) -> bool {
    match peer.send(frame) {
        Ok(()) => true,
        Err(err) => {
            debug!(peer = peer.id(), "send failed: {err}");
            false
        }
    }
}

fn classify(delivered: usize, targets: usize) -> Delivery {
    if delivered == targets {
        Delivery::Complete
    } else if delivered == 0 {
        Delivery::Failed
    } else {
        Delivery::Partial { delivered, targets }
    }
}

/// Sends one line to one peer.
pub fn unicast<P: Peer + ?Sized>(text: &str, peer: &P) -> bool {
    send_frame(&frame(text), peer)
}

/// Sends one line to every peer. An empty peer list is a failure: nothing
/// was delivered.
pub fn broadcast<P: Peer + ?Sized>(text: &str, peers: &[&P]) -> Delivery {
    if peers.is_empty() {
        debug!("broadcast with no recipients");
        return Delivery::Failed;
    }

    let frame = frame(text);
    let delivered = peers.iter().filter(|peer| send_frame(&frame, **peer)).count();

    let outcome = classify(delivered, peers.len());
    if outcome != Delivery::Complete {
        warn!(delivered, targets = peers.len(), "broadcast incomplete");
    }
    outcome
}

/// Sends one line to every peer except the one whose id is `except`.
///
/// Excluding everyone leaves nothing to do, which counts as complete.
pub fn multicast<P: Peer + ?Sized>(text: &str, peers: &[&P], except: PeerId) -> Delivery {
    let frame = frame(text);
    let mut targets = 0;
    let mut delivered = 0;

    for peer in peers.iter().filter(|peer| peer.id() != except) {
        targets += 1;
        if send_frame(&frame, *peer) {
            delivered += 1;
        }
    }

    if targets == 0 {
        debug!(except, "multicast had no targets after exclusion");
        return Delivery::Complete;
    }

    let outcome = classify(delivered, targets);
    if outcome != Delivery::Complete {
        warn!(delivered, targets, "multicast incomplete");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        id: PeerId,
        broken: bool,
        inbox: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn new(id: PeerId) -> Self {
            Self {
                id,
                broken: false,
                inbox: RefCell::new(Vec::new()),
            }
        }

        fn broken(id: PeerId) -> Self {
            Self {
                broken: true,
                ..Self::new(id)
            }
        }

        fn inbox(&self) -> Vec<String> {
            self.inbox.borrow().clone()
        }
    }

    impl Peer for Recorder {
        fn id(&self) -> PeerId {
            self.id
        }

        fn send(&self, frame: &[u8]) -> io::Result<()> {
            if self.broken {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.inbox
                .borrow_mut()
                .push(String::from_utf8(frame.to_vec()).unwrap());
            Ok(())
        }
    }

    #[test]
    fn unicast_appends_crlf() {
        let peer = Recorder::new(1);

        assert!(unicast("hi", &peer));
        assert_eq!(peer.inbox(), vec!["hi\r\n"]);

        assert!(!unicast("hi", &Recorder::broken(2)));
    }

    #[test]
    fn broadcast_without_peers_fails() {
        let peers: [&Recorder; 0] = [];
        assert_eq!(broadcast("x", &peers), Delivery::Failed);
    }

    #[test]
    fn broadcast_classifies_outcomes() {
        let (a, b, dead) = (Recorder::new(1), Recorder::new(2), Recorder::broken(3));

        assert_eq!(broadcast("m", &[&a, &b]), Delivery::Complete);
        assert_eq!(
            broadcast("m", &[&a, &dead, &b]),
            Delivery::Partial {
                delivered: 2,
                targets: 3
            }
        );
        assert_eq!(broadcast("m", &[&dead]), Delivery::Failed);

        // A dead peer in the middle does not stop delivery to later peers.
        assert_eq!(b.inbox().len(), 2);
    }

    #[test]
    fn multicast_skips_excluded_peer_wherever_it_is() {
        for position in 0..3 {
            let peers = [Recorder::new(10), Recorder::new(11), Recorder::new(12)];
            let mut order: Vec<&Recorder> = peers.iter().collect();
            order.rotate_left(position);

            assert_eq!(multicast("m", &order, 11), Delivery::Complete);
            assert_eq!(peers[0].inbox(), vec!["m\r\n"]);
            assert!(peers[1].inbox().is_empty());
            assert_eq!(peers[2].inbox(), vec!["m\r\n"]);
        }
    }

    #[test]
    fn multicast_excluding_everyone_is_vacuous_success() {
        let only = Recorder::new(5);
        assert_eq!(multicast("m", &[&only], 5), Delivery::Complete);
        assert!(only.inbox().is_empty());

        let none: [&Recorder; 0] = [];
        assert_eq!(multicast("m", &none, 5), Delivery::Complete);
    }

    #[test]
    fn multicast_reports_partial_and_total_failure() {
        let (ok, dead, me) = (Recorder::new(1), Recorder::broken(2), Recorder::new(3));

        assert_eq!(
            multicast("m", &[&ok, &dead, &me], 3),
            Delivery::Partial {
                delivered: 1,
                targets: 2
            }
        );
        assert_eq!(multicast("m", &[&dead, &me], 3), Delivery::Failed);
    }

    #[test]
    fn tcp_stream_peer_writes_frame() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        assert!(unicast("over tcp", &server_side));
        drop(server_side);

        let mut received = String::new();
        (&client).read_to_string(&mut received).unwrap();
        assert_eq!(received, "over tcp\r\n");
    }
}
