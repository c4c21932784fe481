//! Prints the Registration CRD manifest to stdout.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/registration.yaml`

use anyhow::Result;

fn main() -> Result<()> {
    print!("{}", crds::registration_crd_yaml()?);
    Ok(())
}
