//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions served and registered by the
//! controller as one multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/all.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use app_controller::crd::{App, Package, PackageMetadata, PackageRepository};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;

fn main() {
    let crds: [CustomResourceDefinition; 4] = [
        App::crd(),
        PackageRepository::crd(),
        Package::crd(),
        PackageMetadata::crd(),
    ];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Change the Rust types under src/crd/ and regenerate instead");
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
