use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use lxs_types::{NodeId, ServerAddr};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pool::Candidate;
use crate::{DialState, ServerPool, ServerRecord};

/// One known server as stored on disk.
#[derive(Serialize, Deserialize)]
struct PersistedServer {
    id: NodeId,
    #[serde(default)]
    addr: Option<SocketAddr>,
    /// Informational only, recomputed from the record on load.
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    record: Option<ServerRecord>,
    #[serde(default)]
    dial: DialState,
}

impl ServerPool {
    /// Write the known servers to the configured `persist_path`, if any.
    pub fn persist(&self) -> Result<()> {
        if let Some(path) = &self.config.persist_path {
            self.save_to(path)?;
        }
        Ok(())
    }

    /// Load the known servers from the configured `persist_path`, if any.
    pub fn restore(&self) -> Result<usize> {
        match &self.config.persist_path {
            Some(path) => self.load_from(path),
            None => Ok(0),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<usize> {
        let servers = self.persisted_servers();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &servers)
            .context("Failed to serialize known servers")?;
        writer.flush()?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move known servers to {}", path.display()))?;

        info!(servers = servers.len(), path = %path.display(), "saved known servers");
        Ok(servers.len())
    }

    /// Merge the servers stored at `path` into the pool. A missing file is not an error.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let servers: Vec<PersistedServer> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse known servers from {}", path.display()))?;

        let count = servers.len();
        for server in servers {
            if let Some(record) = server.record {
                self.records.remove(&server.id);
                self.make_room();
                let _ = self.records.insert(server.id, record);
            }
            if let Some(addr) = server.addr {
                let addr = ServerAddr {
                    id: server.id,
                    addr,
                };
                let mut candidates = self.candidates.lock();
                let candidate = candidates.get_or_insert_mut(server.id, || Candidate {
                    addr,
                    dial: server.dial,
                });
                candidate.addr = addr;
                candidate.dial = server.dial;
            }
        }

        info!(servers = count, path = %path.display(), "loaded known servers");
        Ok(count)
    }

    fn persisted_servers(&self) -> Vec<PersistedServer> {
        let mut servers: Vec<PersistedServer> = self
            .candidates
            .lock()
            .iter()
            .map(|(id, candidate)| PersistedServer {
                id: *id,
                addr: Some(candidate.addr.addr),
                score: None,
                record: None,
                dial: candidate.dial,
            })
            .collect();

        self.records.scan(|id, record| {
            let score = Some(record.score(&self.config));
            match servers.iter_mut().find(|server| server.id == *id) {
                Some(server) => {
                    server.score = score;
                    server.record = Some(record.clone());
                },
                None => servers.push(PersistedServer {
                    id: *id,
                    addr: None,
                    score,
                    record: Some(record.clone()),
                    dial: DialState::default(),
                }),
            }
        });

        servers.sort_by_key(|server| server.id);
        servers
    }
}
