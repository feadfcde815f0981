// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

mod fvp;

use fvp::FvpBuilder;
use std::{error::Error, fs, path::Path};

pub const PLATFORMS: [&str; 1] = [FvpBuilder::PLAT_NAME];

type BuildResult = Result<(), Box<dyn Error>>;

/// The images built from this crate, one per binary target.
#[derive(Clone, Copy, Debug)]
pub enum Image {
    /// The secure partition image, loaded by the SPMC.
    SecurePartition,
    /// The normal world VM image, which drives the suite.
    Vm,
}

impl Image {
    pub const ALL: [Self; 2] = [Self::SecurePartition, Self::Vm];

    /// The name of the binary target for the image.
    pub fn bin_name(self) -> &'static str {
        match self {
            Self::SecurePartition => "acs_sp",
            Self::Vm => "acs_vm",
        }
    }

    /// The symbol of the initial identity map for the image.
    pub fn idmap_symbol(self) -> &'static str {
        match self {
            Self::SecurePartition => "ACS_SP_IDMAP",
            Self::Vm => "ACS_VM_IDMAP",
        }
    }
}

pub trait Builder {
    /// Base address at which the given image is loaded.
    fn image_base(&self, image: Image) -> u64;

    /// Size of the memory region reserved for the given image.
    fn image_size(&self, image: Image) -> u64;
}

pub fn get_builder(platform: &str) -> Result<Box<dyn Builder>, Box<dyn Error>> {
    match platform {
        FvpBuilder::PLAT_NAME => Ok(Box::new(FvpBuilder)),
        _ => Err(format!(
            "Unexpected platform name {platform:?}. Supported platforms: {PLATFORMS:?}"
        )
        .into()),
    }
}

/// Writes a linker script describing the memory layout of the given image, and passes it to the
/// linker for that image's binary only.
pub fn add_image_linker_script(builder: &dyn Builder, image: Image, out_dir: &Path) -> BuildResult {
    let path = out_dir.join(format!("{}.ld", image.bin_name()));
    fs::write(
        &path,
        format!(
            "MEMORY\n{{\n\timage : ORIGIN = {:#x}, LENGTH = {:#x}\n}}\ninitial_pagetable = {};\n",
            builder.image_base(image),
            builder.image_size(image),
            image.idmap_symbol(),
        ),
    )?;
    println!(
        "cargo:rustc-link-arg-bin={}=-T{}",
        image.bin_name(),
        path.display()
    );
    Ok(())
}
