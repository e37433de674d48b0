//! Command-line interface of the operator binary.

use clap::Parser;

/// Kubernetes operator that auto-unseals Vault/OpenBao workloads.
#[derive(Debug, Parser)]
#[command(name = "sealkeeper", version, about)]
pub struct Args {
    /// Replicate cached unseal material across operator replicas. Without
    /// this flag each replica keeps a purely local cache.
    #[arg(long)]
    pub shared_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_cache_defaults_off() {
        let args = Args::parse_from(["sealkeeper"]);
        assert!(!args.shared_cache);

        let args = Args::parse_from(["sealkeeper", "--shared-cache"]);
        assert!(args.shared_cache);
    }
}
