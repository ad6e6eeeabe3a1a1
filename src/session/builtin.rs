//! Built-in command implementations

use super::{FsError, Session, SessionResult};
use crate::archive;
use crate::network::TransportError;
use crate::protocol::READY;

use super::handler::Builtin;

impl Builtin {
    /// Serve one invocation of this command
    pub(crate) async fn run(self, session: &mut Session, args: &[String]) -> SessionResult<()> {
        match self {
            Builtin::Ls => ls(session).await,
            Builtin::Cd => cd(session, &args[0]).await,
            Builtin::Cp => cp(session, args).await,
            Builtin::Up => up(session).await,
            Builtin::Rm => rm(session, &args[0]).await,
            Builtin::Rmdir => rmdir(session, &args[0]).await,
            Builtin::Dc => dc(session).await,
            Builtin::Help => help(session).await,
        }
    }
}

async fn reply_error(session: &mut Session, error: FsError) -> SessionResult<()> {
    session.reply(&error.to_string()).await
}

async fn ls(session: &mut Session) -> SessionResult<()> {
    match session.sandbox.list() {
        Ok(listing) => session.reply(&listing.render()).await,
        Err(e) => reply_error(session, e).await,
    }
}

async fn cd(session: &mut Session, target: &str) -> SessionResult<()> {
    match session.sandbox.change_dir(target) {
        Ok(()) => ls(session).await,
        Err(e) => reply_error(session, e).await,
    }
}

async fn cp(session: &mut Session, targets: &[String]) -> SessionResult<()> {
    let paths = match session.sandbox.resolve_all(targets) {
        Ok(paths) => paths,
        Err(e) => return reply_error(session, e).await,
    };

    if let [single] = paths.as_slice() {
        if !single.is_dir() {
            let single = single.clone();
            session.reply(READY).await?;
            session.transceiver.send_file(&single, false, None).await?;
            return Ok(());
        }
    }

    let cache_dir = session.settings.cache_dir.clone();
    let archive_path = match archive::archive_async(paths, cache_dir).await {
        Ok(path) => path,
        Err(e) => return reply_error(session, FsError::Failed(e.to_string())).await,
    };

    session.reply(READY).await?;
    let sent = session.transceiver.send_file(&archive_path, true, None).await;
    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        tracing::warn!("Failed to remove archive {}: {}", archive_path.display(), e);
    }
    sent?;
    Ok(())
}

async fn up(session: &mut Session) -> SessionResult<()> {
    let cwd = session.sandbox.cwd().to_path_buf();
    match session.transceiver.recv_file(&cwd, None).await {
        Ok(path) => tracing::debug!("Received {}", path.display()),
        // The payload has been fully read, so the stream is still in sync.
        Err(TransportError::Archive(e)) => {
            return reply_error(session, FsError::Failed(e.to_string())).await;
        }
        Err(e) => return Err(e.into()),
    }
    ls(session).await
}

async fn rm(session: &mut Session, name: &str) -> SessionResult<()> {
    match session.sandbox.remove_file(name) {
        Ok(()) => ls(session).await,
        Err(e) => reply_error(session, e).await,
    }
}

async fn rmdir(session: &mut Session, name: &str) -> SessionResult<()> {
    match session.sandbox.remove_dir(name) {
        Ok(()) => ls(session).await,
        Err(e) => reply_error(session, e).await,
    }
}

async fn dc(session: &mut Session) -> SessionResult<()> {
    session.close().await;
    Ok(())
}

async fn help(session: &mut Session) -> SessionResult<()> {
    let text = session.handlers.help_text();
    session.reply(&text).await
}
