use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

use mirror_session::{CLIENT_TOKEN_KEY, ContinuitySignals, SESSION_TOKEN_KEY};

/// Continuity signal carriage for a terminal process.
///
/// The "address" tier is the invocation: tokens arrive as `--client` /
/// `--session` arguments and leave as a printed resume hint. The durable
/// tier is a JSON token file under the config directory, standing in for
/// client-side key/value storage. All writes are fire-and-forget per the
/// capability contract: a failed token write degrades continuity for the
/// next run, never the current conversation.
pub struct LaunchContinuity {
    address: Mutex<HashMap<String, String>>,
    tokens: Mutex<HashMap<String, String>>,
    tokens_path: PathBuf,
}

impl LaunchContinuity {
    pub fn new(
        tokens_path: PathBuf,
        client_arg: Option<String>,
        session_arg: Option<String>,
    ) -> Self {
        let mut address = HashMap::new();
        if let Some(client) = client_arg {
            address.insert(CLIENT_TOKEN_KEY.to_string(), client);
        }
        if let Some(session) = session_arg {
            address.insert(SESSION_TOKEN_KEY.to_string(), session);
        }

        let tokens = load_tokens(&tokens_path);

        Self {
            address: Mutex::new(address),
            tokens: Mutex::new(tokens),
            tokens_path,
        }
    }

    /// Arguments that reattach the next invocation to this conversation.
    pub fn resume_hint(&self) -> Option<String> {
        let address = self.address.lock();
        let client = address.get(CLIENT_TOKEN_KEY)?;

        let mut hint = format!("--client {client}");
        if let Some(session) = address.get(SESSION_TOKEN_KEY) {
            hint.push_str(&format!(" --session {session}"));
        }

        Some(hint)
    }

    fn persist_tokens(&self) {
        let snapshot = self.tokens.lock().clone();

        let serialized = match serde_json::to_string_pretty(&snapshot) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "failed to encode continuity tokens");
                return;
            }
        };

        if let Some(parent) = self.tokens_path.parent()
            && let Err(error) = std::fs::create_dir_all(parent)
        {
            warn!(%error, "failed to create continuity token directory");
            return;
        }

        let temp_path = self.tokens_path.with_extension("json.tmp");
        if let Err(error) = std::fs::write(&temp_path, serialized) {
            warn!(%error, "failed to write continuity tokens");
            return;
        }
        if let Err(error) = std::fs::rename(&temp_path, &self.tokens_path) {
            warn!(%error, "failed to replace continuity token file");
        }
    }
}

impl ContinuitySignals for LaunchContinuity {
    fn address_param(&self, key: &str) -> Option<String> {
        self.address.lock().get(key).cloned()
    }

    fn set_address_param(&self, key: &str, value: &str) {
        debug!(key, value, "carrying token in the invocation address");
        self.address
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    fn read_token(&self, key: &str) -> Option<String> {
        self.tokens.lock().get(key).cloned()
    }

    fn write_token(&self, key: &str, value: &str) {
        self.tokens
            .lock()
            .insert(key.to_string(), value.to_string());
        self.persist_tokens();
    }
}

fn load_tokens(path: &PathBuf) -> HashMap<String, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(error) => {
            warn!(%error, "failed to read continuity token file; starting without tokens");
            return HashMap::new();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(tokens) => tokens,
        Err(error) => {
            warn!(%error, "continuity token file is malformed; starting without tokens");
            HashMap::new()
        }
    }
}
