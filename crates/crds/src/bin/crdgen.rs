//! Prints the netplane CRD manifests as a multi-document YAML stream.

use crds::{IPInstance, Network, RemoteSubnet, RemoteVtep, Subnet};
use anyhow::Context;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Network::crd(),
        Subnet::crd(),
        IPInstance::crd(),
        RemoteVtep::crd(),
        RemoteSubnet::crd(),
    ];

    for crd in &crds {
        println!("---");
        let yaml = serde_yaml::to_string(crd).with_context(|| format!("serializing CRD {:?}", crd.metadata.name))?;
        print!("{yaml}");
    }

    Ok(())
}
