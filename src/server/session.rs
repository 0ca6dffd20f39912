// src/server/session.rs

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver};
use tracing::{debug, info, warn};

use crate::common::error::{ProtocolError, Result};
use crate::common::frame::{read_text_frame, write_text_frame};
use crate::common::protocol::{ChatCommand, ServerFrame};
use crate::server::engine::ServerContext;
use crate::server::registry::Participant;
use crate::server::router::SessionFlow;

/// Run an identified chat session until the participant leaves or its
/// connection fails. The display name is the already-consumed first frame.
pub fn run_chat_session(
    ctx: &ServerContext,
    conn_id: u64,
    mut stream: TcpStream,
    display_name: String,
) -> Result<()> {
    let max_frame = ctx.config.max_text_frame;
    let location = read_text_frame(&mut stream, max_frame)?;
    // Idle chat is normal; only writes keep their timeout.
    stream.set_read_timeout(None)?;

    let (outbox, queued) = unbounded();
    let participant = Arc::new(
        Participant::new(conn_id, display_name, location, outbox).with_connection(stream.try_clone()?),
    );

    if let Err(e) = ctx.router.join(Arc::clone(&participant)) {
        if let ProtocolError::NameTaken(ref name) = e {
            write_text_frame(&mut stream, &ServerFrame::name_taken(name).to_string())?;
        }
        return Err(e);
    }

    let writer = match spawn_writer(conn_id, stream.try_clone()?, queued) {
        Ok(writer) => writer,
        Err(e) => {
            ctx.router.leave(&participant);
            return Err(e.into());
        }
    };

    let outcome = read_commands(ctx, &participant, &mut stream);

    ctx.router.leave(&participant);
    // The writer drains the outbox and exits once the last sender is gone.
    drop(participant);
    if writer.join().is_err() {
        warn!(conn = conn_id, "writer thread panicked");
    }
    let _ = stream.shutdown(Shutdown::Both);

    outcome
}

fn read_commands(ctx: &ServerContext, participant: &Participant, stream: &mut TcpStream) -> Result<()> {
    let name = participant.display_name();
    loop {
        let frame = read_text_frame(stream, ctx.config.max_text_frame)?;
        debug!(name, frame = %frame, "chat frame");

        match ChatCommand::parse(&frame) {
            Ok(command) => {
                if ctx.router.dispatch(participant, command) == SessionFlow::Leave {
                    info!(name, "participant said goodbye");
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(name, error = %e, "rejected chat frame");
                if let Err(send_err) = participant.send(&ServerFrame::system(e.to_string())) {
                    debug!(name, error = %send_err, "could not report rejected frame");
                }
            }
        }
    }
}

/// The only writer of a participant's socket. A failed write closes the
/// socket so the session's reader stops as well.
fn spawn_writer(conn_id: u64, mut stream: TcpStream, queued: Receiver<String>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("conn-{}-writer", conn_id))
        .spawn(move || {
            for frame in queued.iter() {
                if let Err(e) = write_text_frame(&mut stream, &frame) {
                    warn!(conn = conn_id, error = %e, "write failed, closing connection");
                    let _ = stream.shutdown(Shutdown::Both);
                    break;
                }
            }
        })
}
