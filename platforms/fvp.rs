// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::{Builder, Image};

const SP_BASE: u64 = 0x0600_0000;
const SP_SIZE: u64 = 0x0020_0000;
const VM_BASE: u64 = 0x8800_0000;
const VM_SIZE: u64 = 0x0100_0000;

pub struct FvpBuilder;

impl Builder for FvpBuilder {
    fn image_base(&self, image: Image) -> u64 {
        match image {
            Image::SecurePartition => SP_BASE,
            Image::Vm => VM_BASE,
        }
    }

    fn image_size(&self, image: Image) -> u64 {
        match image {
            Image::SecurePartition => SP_SIZE,
            Image::Vm => VM_SIZE,
        }
    }
}

impl FvpBuilder {
    pub const PLAT_NAME: &str = "fvp";
}
