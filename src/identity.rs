//! Persistent client identity for the Init handshake.
//!
//! Cameras key pairing state on the client GUID, so it must be stable
//! across app restarts. The GUID lives in a small file under the caches
//! root and is loaded once per process.

use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use rand::RngCore;
use tracing::{debug, warn};

static IDENTITY: OnceCell<ClientIdentity> = OnceCell::new();

const GUID_FILE: &str = "client-guid";

#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub guid: [u8; 16],
    pub hostname: String,
}

impl ClientIdentity {
    fn generate() -> Self {
        let mut guid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut guid);
        Self {
            guid,
            hostname: default_hostname(),
        }
    }

    fn load_or_create(dir: &Path) -> Self {
        let path = dir.join(GUID_FILE);
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(bytes) = hex::decode(contents.trim()) {
                if bytes.len() == 16 {
                    let mut guid = [0u8; 16];
                    guid.copy_from_slice(&bytes);
                    debug!("loaded client guid {}", hex::encode(guid));
                    return Self {
                        guid,
                        hostname: default_hostname(),
                    };
                }
            }
            warn!("client guid file {} is corrupt, regenerating", path.display());
        }

        let identity = Self::generate();
        if let Err(e) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, hex::encode(identity.guid))) {
            warn!("could not persist client guid to {}: {}", path.display(), e);
        }
        identity
    }
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sabaipics".to_string())
}

/// The process-wide identity, created on first use.
pub fn client_identity(caches_root: &Path) -> &'static ClientIdentity {
    IDENTITY.get_or_init(|| ClientIdentity::load_or_create(&caches_root.join("sabaipics")))
}
