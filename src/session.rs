use crate::types::Session;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SESSION_DIR: &str = "~/.case-portal";
const USER_FILE: &str = "user.json";
const TOKEN_FILE: &str = "token";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NoSession,
}

/// The one place the signed-in user lives. Every mutation goes through
/// `replace_session`, `clear_session` or `apply_balance`.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    session: Option<Session>,
    token: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn replace_session(&mut self, session: Session, token: impl Into<String>) {
        self.session = Some(session);
        self.token = Some(token.into());
    }

    pub fn clear_session(&mut self) {
        self.session = None;
        self.token = None;
    }

    /// Overwrites the balance with the value the server reported.
    pub fn apply_balance(&mut self, new_balance: f64) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoSession)?;
        session.balance = new_balance;
        Ok(())
    }
}

/// On-disk copy of the session: `user.json` plus an opaque `token` file.
#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<Option<(Session, String)>> {
        let user_path = self.dir.join(USER_FILE);
        let token_path = self.dir.join(TOKEN_FILE);
        if !user_path.exists() || !token_path.exists() {
            return Ok(None);
        }
        let token = fs::read_to_string(&token_path)
            .wrap_err("Failed to read saved session token")?
            .trim()
            .to_string();
        let raw_user = fs::read(&user_path).wrap_err("Failed to read saved user")?;
        if token.is_empty() || raw_user.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice::<Session>(&raw_user) {
            Ok(session) => Ok(Some((session, token))),
            Err(err) => {
                warn!(path = %user_path.display(), %err, "ignoring unreadable saved user");
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &Session, token: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).wrap_err_with(|| {
            format!("Failed to create session directory {}", self.dir.display())
        })?;
        let json =
            serde_json::to_vec_pretty(session).wrap_err("Failed to serialize user")?;
        fs::write(self.dir.join(USER_FILE), json).wrap_err("Failed to write user")?;
        fs::write(self.dir.join(TOKEN_FILE), token).wrap_err("Failed to write token")?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        for name in [USER_FILE, TOKEN_FILE] {
            let path = self.dir.join(name);
            if path.exists() {
                fs::remove_file(&path)
                    .wrap_err_with(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

pub fn resolve_session_dir(dir: Option<&str>) -> PathBuf {
    let raw = dir.unwrap_or(DEFAULT_SESSION_DIR);
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
