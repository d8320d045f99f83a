//! Resolve command: print where references would be mirrored.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use regmirror_core::{ImageReference, NamespaceResolver};

use super::context;

/// Arguments for the resolve command.
#[derive(Args)]
pub struct ResolveArgs {
    /// Image references to resolve
    #[arg(required = true)]
    pub references: Vec<String>,

    /// Configuration file providing the domain map
    #[arg(short, long, env = "REGMIRROR_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Runs the resolve command. Exits 1 if any reference is invalid.
pub fn run(args: &ResolveArgs) -> Result<u8> {
    let config = context::load_config_from(args.config.as_deref(), None)?;
    let resolver = config.resolver();

    let mut code = 0;
    for reference in &args.references {
        match resolve(&resolver, reference) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                eprintln!("{e}");
                code = 1;
            }
        }
    }
    Ok(code)
}

fn resolve(resolver: &NamespaceResolver, reference: &str) -> regmirror_core::Result<String> {
    let image = ImageReference::parse(reference)?;
    let destination = resolver.resolve_image(&image);
    Ok(format!("{reference} -> {}:{}", destination.path, destination.tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_line() {
        let resolver = NamespaceResolver::default();
        assert_eq!(
            resolve(&resolver, "quay.io/coreos/etcd:v3.5.0").unwrap(),
            "quay.io/coreos/etcd:v3.5.0 -> quay/coreos/etcd:v3.5.0"
        );
        assert_eq!(
            resolve(&resolver, "nginx").unwrap(),
            "nginx -> dockerhub/nginx:latest"
        );
        assert!(resolve(&resolver, "nginx@sha256:abc").is_err());
    }
}
