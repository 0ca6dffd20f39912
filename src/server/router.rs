// src/server/router.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::error::{ProtocolError, Result};
use crate::common::protocol::{ChatCommand, ServerFrame, ALL_INSPECTORS};
use crate::server::file_catalog::FileCatalogEntry;
use crate::server::registry::{ClientRegistry, Participant};

pub const UNKNOWN_COMMAND_NOTICE: &str = "unknown command";

/// What the chat session should do after a command has been routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Leave,
}

/// Delivers chat traffic between registered participants.
///
/// Targets are copied out of the registry under its lock and written to
/// without it. A failed delivery is logged and never retried; the failing
/// recipient's own session notices the dead socket and cleans up.
pub struct MessageRouter {
    registry: Arc<ClientRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        MessageRouter { registry }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Register `participant`, greet it with its roster and announce it to
    /// everyone else.
    pub fn join(&self, participant: Arc<Participant>) -> Result<()> {
        let name = participant.display_name().to_string();
        let others = self.registry.register_with(Arc::clone(&participant), |others| {
            let roster = others.iter().map(|p| p.display_name().to_string()).collect();
            let greeting = [
                ServerFrame::Welcome(name.clone()),
                ServerFrame::Location(participant.location().to_string()),
                ServerFrame::Roster(roster),
            ];
            for frame in &greeting {
                reply(&participant, frame);
            }
        })?;

        deliver(&others, &ServerFrame::Connected(name.clone()));
        info!(name = %name, location = participant.location(), "participant joined");
        Ok(())
    }

    /// Unregister `participant` and announce its departure. Calling this
    /// twice is harmless; only the first call announces anything.
    pub fn leave(&self, participant: &Participant) -> bool {
        match self.registry.unregister(participant) {
            Some(remaining) => {
                deliver(
                    &remaining,
                    &ServerFrame::Disconnected(participant.display_name().to_string()),
                );
                info!(name = participant.display_name(), "participant left");
                true
            }
            None => false,
        }
    }

    /// Deliver to every registered participant except `exclude`.
    pub fn broadcast_to_all(&self, frame: &ServerFrame, exclude: Option<&str>) -> usize {
        let targets: Vec<_> = self
            .registry
            .participants()
            .into_iter()
            .filter(|p| Some(p.display_name()) != exclude)
            .collect();
        deliver(&targets, frame)
    }

    /// Deliver to the participant called `recipient`, or tell `sender` that
    /// nobody by that name is connected.
    pub fn direct_to(&self, sender: &Participant, recipient: &str, frame: &ServerFrame) -> Result<()> {
        match self.registry.find(recipient) {
            Some(target) => {
                deliver(std::slice::from_ref(&target), frame);
                Ok(())
            }
            None => {
                let err = ProtocolError::RecipientNotFound(recipient.to_string());
                if let Err(e) = sender.send(&ServerFrame::system(err.to_string())) {
                    debug!(sender = sender.display_name(), error = %e, "could not notify sender");
                }
                Err(err)
            }
        }
    }

    /// Alerts reach everybody but their sender.
    pub fn alert(&self, sender: &Participant, text: &str) -> usize {
        let frame = ServerFrame::Alert {
            sender: sender.display_name().to_string(),
            text: text.to_string(),
        };
        info!(sender = sender.display_name(), "alert raised");
        self.broadcast_to_all(&frame, Some(sender.display_name()))
    }

    /// The roster as seen by `requester`: everybody but itself.
    pub fn roster_for(&self, requester: &str) -> ServerFrame {
        let names = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|name| name != requester)
            .collect();
        ServerFrame::Roster(names)
    }

    /// Route one command from an identified participant.
    pub fn dispatch(&self, sender: &Participant, command: ChatCommand) -> SessionFlow {
        let name = sender.display_name();
        match command {
            ChatCommand::Leave => return SessionFlow::Leave,
            ChatCommand::RosterRequest => {
                reply(sender, &self.roster_for(name));
            }
            ChatCommand::Broadcast { text } => {
                let frame = ServerFrame::MessageFrom {
                    sender: name.to_string(),
                    text,
                    private: false,
                };
                self.broadcast_to_all(&frame, Some(name));
            }
            ChatCommand::Directed { recipient, text } => {
                let frame = ServerFrame::MessageFrom {
                    sender: name.to_string(),
                    text,
                    private: true,
                };
                if let Err(e) = self.direct_to(sender, &recipient, &frame) {
                    debug!(sender = name, error = %e, "directed message not delivered");
                }
            }
            ChatCommand::Alert { text } => {
                self.alert(sender, &text);
            }
            ChatCommand::Report { kind, text } => {
                self.broadcast_to_all(&ServerFrame::Report { kind, text }, Some(name));
            }
            ChatCommand::Plain { text } => {
                let frame = ServerFrame::chatter(name, sender.location(), &text);
                self.broadcast_to_all(&frame, None);
            }
            ChatCommand::Unknown { tag } => {
                warn!(sender = name, tag = %tag, "unknown chat command");
                reply(sender, &ServerFrame::system(UNKNOWN_COMMAND_NOTICE));
            }
        }
        SessionFlow::Continue
    }

    /// Tell the upload's recipient(s) that a file is available.
    ///
    /// An unresolvable recipient drops the notice; the file stays catalogued.
    pub fn notify_upload(&self, recipient: &str, entry: &FileCatalogEntry) -> Result<usize> {
        let frame = ServerFrame::FileAvailable {
            key: entry.unique_key.clone(),
            sender: entry.uploader.clone(),
            original_name: entry.original_name.clone(),
        };

        if recipient == ALL_INSPECTORS {
            return Ok(self.broadcast_to_all(&frame, None));
        }

        match self.registry.find(recipient) {
            Some(target) => Ok(deliver(std::slice::from_ref(&target), &frame)),
            None => Err(ProtocolError::RecipientNotFound(recipient.to_string())),
        }
    }
}

fn deliver(targets: &[Arc<Participant>], frame: &ServerFrame) -> usize {
    let mut delivered = 0;
    for target in targets {
        match target.send(frame) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(recipient = target.display_name(), error = %e, "delivery failed"),
        }
    }
    delivered
}

fn reply(sender: &Participant, frame: &ServerFrame) {
    if let Err(e) = sender.send(frame) {
        debug!(recipient = sender.display_name(), error = %e, "reply failed");
    }
}
