// src/server/registry.rs

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

use crate::common::error::{ProtocolError, Result};
use crate::common::protocol::{ServerFrame, RESERVED_NAMES};

/// A named, identified chat endpoint.
///
/// Frames for the participant go through `outbox`; a single writer thread
/// owns the socket's write side, so deliveries to one participant are never
/// interleaved.
#[derive(Debug)]
pub struct Participant {
    session_id: u64,
    display_name: String,
    location: String,
    peer: Option<SocketAddr>,
    outbox: Sender<String>,
    control: Option<TcpStream>,
}

impl Participant {
    pub fn new(
        session_id: u64,
        display_name: impl Into<String>,
        location: impl Into<String>,
        outbox: Sender<String>,
    ) -> Self {
        Participant {
            session_id,
            display_name: display_name.into(),
            location: location.into(),
            peer: None,
            outbox,
            control: None,
        }
    }

    /// Attach the socket so the participant can be disconnected from outside
    /// its own session.
    pub fn with_connection(mut self, stream: TcpStream) -> Self {
        self.peer = stream.peer_addr().ok();
        self.control = Some(stream);
        self
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a frame for delivery. Fails only once the writer has gone away.
    pub fn send(&self, frame: &ServerFrame) -> Result<()> {
        self.outbox
            .send(frame.to_string())
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Close the socket in both directions, which ends the session's reader.
    pub fn disconnect(&self) {
        if let Some(stream) = &self.control {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// The set of currently identified participants, in join order.
pub struct ClientRegistry {
    participants: Mutex<Vec<Arc<Participant>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            participants: Mutex::new(Vec::new()),
        }
    }

    /// Insert `participant` unless its name is taken or reserved.
    ///
    /// Returns everybody else who was registered at that instant.
    pub fn register(&self, participant: Arc<Participant>) -> Result<Vec<Arc<Participant>>> {
        self.register_with(participant, |_| {})
    }

    /// Like [`ClientRegistry::register`], running `on_admit` with the other
    /// participants while the lock is still held. Nobody can route to the
    /// newcomer before `on_admit` returns.
    pub fn register_with<F>(&self, participant: Arc<Participant>, on_admit: F) -> Result<Vec<Arc<Participant>>>
    where
        F: FnOnce(&[Arc<Participant>]),
    {
        let name = participant.display_name();
        if RESERVED_NAMES.contains(&name) {
            return Err(ProtocolError::NameTaken(name.to_string()));
        }

        let mut participants = self.participants.lock();
        if participants.iter().any(|p| p.display_name() == name) {
            return Err(ProtocolError::NameTaken(name.to_string()));
        }

        let others = participants.clone();
        on_admit(&others);
        debug!(name, session = participant.session_id(), "registered");
        participants.push(participant);
        Ok(others)
    }

    /// Remove the participant with this session. Returns the remaining
    /// participants, or `None` if it was not registered.
    pub fn unregister(&self, participant: &Participant) -> Option<Vec<Arc<Participant>>> {
        let mut participants = self.participants.lock();
        let index = participants
            .iter()
            .position(|p| p.session_id() == participant.session_id())?;
        participants.remove(index);
        debug!(name = participant.display_name(), session = participant.session_id(), "unregistered");
        Some(participants.clone())
    }

    /// Display names in join order.
    pub fn snapshot(&self) -> Vec<String> {
        self.participants
            .lock()
            .iter()
            .map(|p| p.display_name().to_string())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Participant>> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.display_name() == name)
            .cloned()
    }

    pub fn participants(&self) -> Vec<Arc<Participant>> {
        self.participants.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.participants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every participant's socket. Each session unregisters
    /// itself as its reader fails.
    pub fn disconnect_all(&self) {
        for participant in self.participants() {
            participant.disconnect();
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver};
    use std::sync::Barrier;
    use std::thread;

    fn participant(id: u64, name: &str) -> (Arc<Participant>, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Arc::new(Participant::new(id, name, "Ponte", tx)), rx)
    }

    #[test]
    fn test_register_and_find() {
        let registry = ClientRegistry::new();
        let (ana, _ana_rx) = participant(1, "Ana");
        let (bruno, _bruno_rx) = participant(2, "Bruno");

        assert!(registry.register(ana).unwrap().is_empty());
        let others = registry.register(bruno).unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].display_name(), "Ana");

        assert_eq!(registry.snapshot(), vec!["Ana", "Bruno"]);
        assert_eq!(registry.find("Bruno").unwrap().session_id(), 2);
        assert!(registry.find("bruno").is_none());
    }

    #[test]
    fn test_duplicate_and_reserved_names_are_refused() {
        let registry = ClientRegistry::new();
        let (ana, _rx1) = participant(1, "Ana");
        let (impostor, _rx2) = participant(2, "Ana");
        let (system, _rx3) = participant(3, "Sistema");

        registry.register(ana).unwrap();
        assert!(matches!(registry.register(impostor), Err(ProtocolError::NameTaken(_))));
        assert!(matches!(registry.register(system), Err(ProtocolError::NameTaken(_))));
        assert_eq!(registry.find("Ana").unwrap().session_id(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent_and_keyed_by_session() {
        let registry = ClientRegistry::new();
        let (old_ana, _rx1) = participant(1, "Ana");
        registry.register(Arc::clone(&old_ana)).unwrap();
        assert!(registry.unregister(&old_ana).unwrap().is_empty());
        assert!(registry.unregister(&old_ana).is_none());

        let (new_ana, _rx2) = participant(2, "Ana");
        registry.register(new_ana).unwrap();
        // A stale teardown of the first session must not evict the second.
        assert!(registry.unregister(&old_ana).is_none());
        assert_eq!(registry.snapshot(), vec!["Ana"]);
    }

    #[test]
    fn test_concurrent_registration_of_one_name() {
        let registry = Arc::new(ClientRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16u64)
            .map(|id| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let (p, _rx) = participant(id, "Duplicado");
                    barrier.wait();
                    registry.register(p).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.snapshot(), vec!["Duplicado"]);
    }

    #[test]
    fn test_snapshot_never_lists_removed_participants() {
        let registry = ClientRegistry::new();
        let mut live = Vec::new();
        for id in 0..10u64 {
            let (p, rx) = participant(id, &format!("Inspetor{}", id));
            registry.register(Arc::clone(&p)).unwrap();
            live.push((p, rx));
        }
        for (p, _) in live.iter().filter(|(p, _)| p.session_id() % 3 == 0) {
            registry.unregister(p);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 6);
        for (p, _) in &live {
            assert_eq!(
                snapshot.iter().any(|n| n == p.display_name()),
                p.session_id() % 3 != 0
            );
        }
    }

    #[test]
    fn test_send_fails_once_writer_is_gone() {
        let (ana, rx) = participant(1, "Ana");
        ana.send(&ServerFrame::Connected("Bruno".into())).unwrap();
        assert_eq!(rx.recv().unwrap(), "CHAT:CONECTADO:Bruno");

        drop(rx);
        assert!(matches!(
            ana.send(&ServerFrame::Connected("Carla".into())),
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
