//! Subcommand handling for kproxy.
//!
//! This module handles lightweight subcommands that do not start the proxy.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::ca::CertificateAuthority;
use crate::cli::Commands;

/// File name of a generated CA certificate.
pub const CA_CERT_FILE: &str = "ca.crt";

/// File name of a generated CA private key.
pub const CA_KEY_FILE: &str = "ca.key";

/// Handle subcommands.
pub fn handle_command(command: &Commands) -> Result<()> {
    match command {
        Commands::GenerateCa { out_dir } => generate_ca(out_dir),
    }
}

/// Generate a root CA and write it to `out_dir`.
fn generate_ca(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory {}", out_dir.display()))?;

    let cert_path = out_dir.join(CA_CERT_FILE);
    let key_path = out_dir.join(CA_KEY_FILE);

    let ca = CertificateAuthority::generate().context("Failed to generate CA")?;
    ca.save(&cert_path, &key_path)
        .context("Failed to write CA files")?;

    info!("Generated CA in {}", out_dir.display());
    println!("CA certificate: {}", cert_path.display());
    println!("CA private key: {}", key_path.display());
    println!(
        "Run with: kproxy --mitm --cacert {} --cakey {}",
        cert_path.display(),
        key_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::IssueCertificate;

    #[test]
    fn test_generate_ca_writes_loadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("nested").join("ca");

        handle_command(&Commands::GenerateCa {
            out_dir: out_dir.clone(),
        })
        .unwrap();

        let ca = CertificateAuthority::load(&out_dir.join(CA_CERT_FILE), &out_dir.join(CA_KEY_FILE))
            .unwrap();
        assert!(ca.issue(&["example.com"], 1).is_ok());
    }
}
