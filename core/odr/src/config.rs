use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blocks per canonical-hash trie section.
    pub cht_size: u64,
    /// Blocks per bloom trie section.
    pub bloom_trie_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cht_size: 32768,
            bloom_trie_size: 32768,
        }
    }
}

impl Config {
    /// Lowest head a server must have announced to hold the whole CHT up to `section`.
    pub fn cht_head(&self, section: u64) -> u64 {
        section_end(section, self.cht_size)
    }

    /// Lowest head a server must have announced to hold the bloom trie up to `section`.
    pub fn bloom_trie_head(&self, section: u64) -> u64 {
        section_end(section, self.bloom_trie_size)
    }
}

fn section_end(section: u64, size: u64) -> u64 {
    section
        .saturating_add(1)
        .saturating_mul(size)
        .saturating_sub(1)
}
