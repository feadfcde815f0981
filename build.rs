// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build script for the FF-A ACS endpoint images.

mod platforms;

use platforms::{Builder, Image, PLATFORMS, add_image_linker_script, get_builder};
use std::{env, path::PathBuf};

fn setup_linker(builder: &dyn Builder) {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("Missing OUT_DIR"));
    for image in Image::ALL {
        add_image_linker_script(builder, image, &out_dir).unwrap();
    }
    println!("cargo:rustc-link-arg=-Timage.ld");
}

fn main() {
    println!(
        "cargo::rustc-check-cfg=cfg(platform, values(\"{}\"))",
        PLATFORMS.join("\", \""),
    );
    println!("cargo:rerun-if-changed=platforms.rs");
    println!("cargo:rerun-if-changed=platforms");

    if env::var("CARGO_CFG_TARGET_OS").unwrap() == "none" {
        let platform = env::var("CARGO_CFG_PLATFORM").expect("Missing platform name");

        let platform_builder = get_builder(&platform).unwrap();

        setup_linker(&*platform_builder);
    }
}
