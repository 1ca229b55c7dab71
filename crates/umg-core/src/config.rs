use crate::error::{UmgError, UmgResult};

/// Engine-level tunables, independent of how the host process loads them
/// (the `umg-server` CLI layer maps its `clap`-parsed flags onto this
/// struct). Defaults match the environment variables enumerated in
/// the external-interfaces config table.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Candidates below this confidence are dropped before commit.
    pub min_confidence: f32,
    /// Nightly global decay multiplier applied to every edge weight.
    pub decay_factor: f32,
    /// Edges with weight below this after decay are deleted.
    pub prune_threshold: f32,
    /// Cosine-similarity floor for the embedding-similarity strategy and
    /// the Entity Resolver's optional semantic match step.
    pub embedding_similarity_threshold: f32,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters.
    pub chunk_overlap: usize,
    /// How often the Archivist drains pending events, in seconds.
    pub archivist_poll_interval_sec: u64,
    /// Local hour (0-23) at which the nightly relationship-engine run fires.
    pub nightly_hour_local: u8,
    /// Bounded-retry ceiling before a RawEvent is marked `failed`.
    pub max_event_retries: u32,
    /// Soft cap on the nightly job, in minutes, before remaining strategies
    /// are skipped (decay/prune still run if not yet started).
    pub nightly_soft_cap_minutes: u64,
    /// Normalized-title fuzzy match floor (Levenshtein ratio) in the
    /// Entity Resolver.
    pub fuzzy_match_threshold: f64,
    /// When true, the Relationship Engine commits are logged but not
    /// written.
    pub shadow_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            decay_factor: 0.99,
            prune_threshold: 0.1,
            embedding_similarity_threshold: 0.75,
            chunk_size: 1000,
            chunk_overlap: 100,
            archivist_poll_interval_sec: 60,
            nightly_hour_local: 3,
            max_event_retries: crate::inbox::DEFAULT_MAX_RETRIES,
            nightly_soft_cap_minutes: 30,
            fuzzy_match_threshold: 0.92,
            shadow_mode: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> UmgResult<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(UmgError::Config("min_confidence must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.decay_factor) {
            return Err(UmgError::Config("decay_factor must be in [0,1]".into()));
        }
        if self.prune_threshold < 0.0 {
            return Err(UmgError::Config("prune_threshold must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.embedding_similarity_threshold) {
            return Err(UmgError::Config(
                "embedding_similarity_threshold must be in [0,1]".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(UmgError::Config("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(UmgError::Config("chunk_overlap must be < chunk_size".into()));
        }
        if self.nightly_hour_local > 23 {
            return Err(UmgError::Config("nightly_hour_local must be 0-23".into()));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_match_threshold) {
            return Err(UmgError::Config("fuzzy_match_threshold must be in [0,1]".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_confidence, 0.3);
        assert_eq!(cfg.decay_factor, 0.99);
        assert_eq!(cfg.prune_threshold, 0.1);
        assert_eq!(cfg.embedding_similarity_threshold, 0.75);
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.chunk_overlap, 100);
        assert_eq!(cfg.archivist_poll_interval_sec, 60);
        assert_eq!(cfg.nightly_hour_local, 3);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = EngineConfig::default();
        cfg.chunk_overlap = cfg.chunk_size;
        assert!(cfg.validate().is_err());
    }
}
