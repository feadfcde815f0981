// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::{Platform, PowerOnError, sp805::Sp805};
use crate::{
    config::{AcsConfig, ExceptionLevel},
    endpoint::{EndpointInfo, LogicalId, Properties},
    logger::LockedWriter,
    secondary::secondary_entry,
};
use aarch64_paging::descriptor::Attributes;
use aarch64_rt::InitialPagetable;
use arm_ffa::Version;
use arm_pl011_uart::{PL011Registers, Uart, UniqueMmioPointer};
use arm_sysregs::{MpidrEl1, read_mpidr_el1};
use core::{
    arch::{global_asm, naked_asm},
    ptr::NonNull,
};
use log::error;
use smccc::{Smc, psci};
use spin::{Once, mutex::SpinMutex};
use uuid::Uuid;

/// Base address of the primary PL011 UART.
const PL011_BASE_ADDRESS: NonNull<PL011Registers> = NonNull::new(0x1C09_0000 as _).unwrap();
/// Base address of the SP805 watchdog.
const SP805_BASE_ADDRESS: *mut u32 = 0x1C0F_0000 as _;

const FVP_CLUSTER_COUNT: usize = 2;
const FVP_MAX_CPUS_PER_CLUSTER: usize = 4;
const FVP_MAX_PE_PER_CPU: usize = 1;

/// 100 seconds at the 1 MHz watchdog clock.
const WATCHDOG_LOAD: u32 = 999 * 100 * 1000;

const MP_PROPERTIES: Properties =
    Properties::DIRECT_REQUEST_RECV.union(Properties::DIRECT_REQUEST_SEND);

const DEVICE_ATTRIBUTES: Attributes = Attributes::VALID
    .union(Attributes::ATTRIBUTE_INDEX_0)
    .union(Attributes::ACCESSED)
    .union(Attributes::UXN);
const MEMORY_ATTRIBUTES: Attributes = Attributes::VALID
    .union(Attributes::ATTRIBUTE_INDEX_1)
    .union(Attributes::INNER_SHAREABLE)
    .union(Attributes::ACCESSED)
    .union(Attributes::NON_GLOBAL);

static WATCHDOG: Once<SpinMutex<Sp805>> = Once::new();

fn watchdog() -> &'static SpinMutex<Sp805> {
    WATCHDOG.call_once(|| {
        // SAFETY: `SP805_BASE_ADDRESS` is the base address of an SP805 device, and nothing else
        // accesses that address range.
        SpinMutex::new(unsafe { Sp805::new(SP805_BASE_ADDRESS) })
    })
}

pub struct Fvp;

// SAFETY: `core_position` is indeed a naked function, doesn't access any memory, only clobbers
// x0-x3, and returns a unique core index as long as `FVP_MAX_CPUS_PER_CLUSTER` and
// `FVP_MAX_PE_PER_CPU` are correct. `current_core` is derived from it.
unsafe impl Platform for Fvp {
    const CORE_COUNT: usize = FVP_CLUSTER_COUNT * FVP_MAX_CPUS_PER_CLUSTER * FVP_MAX_PE_PER_CPU;

    const CONFIG: AcsConfig = AcsConfig {
        ffa_version: Version(1, 1),
        suite: None,
        ns_hypervisor_present: true,
        spmc_el: ExceptionLevel::El2,
        sp_el: Some(ExceptionLevel::El1),
        sp_send_direct_req: true,
        vm_send_direct_resp: true,
        hosted: false,
        watchdog_load: WATCHDOG_LOAD,
    };

    const ENDPOINTS: &'static [EndpointInfo] = &[
        EndpointInfo {
            name: "SP1",
            logical_id: LogicalId::Sp1,
            id: 0x8001,
            el: Some(ExceptionLevel::El1),
            ec_count: Self::CORE_COUNT as u16,
            properties: MP_PROPERTIES,
            uuid: Uuid::from_u128(0xb4b5_671e_4a90_4fe1_b81f_fb13_dae1_dacb),
        },
        EndpointInfo {
            name: "SP2",
            logical_id: LogicalId::Sp2,
            id: 0x8002,
            el: Some(ExceptionLevel::El1),
            ec_count: Self::CORE_COUNT as u16,
            properties: MP_PROPERTIES,
            uuid: Uuid::from_u128(0xd158_2309_f023_47b9_827c_4464_f557_8fc8),
        },
        EndpointInfo {
            name: "SP3",
            logical_id: LogicalId::Sp3,
            id: 0x8003,
            el: Some(ExceptionLevel::El1),
            ec_count: 1,
            properties: MP_PROPERTIES,
            uuid: Uuid::from_u128(0x79b5_5c73_1d8c_44b9_8593_61e1_770a_d8d2),
        },
        EndpointInfo {
            name: "VM1",
            logical_id: LogicalId::Vm1,
            id: 1,
            el: None,
            ec_count: Self::CORE_COUNT as u16,
            properties: Properties::all(),
            uuid: Uuid::nil(),
        },
        EndpointInfo {
            name: "VM2",
            logical_id: LogicalId::Vm2,
            id: 2,
            el: None,
            ec_count: 1,
            properties: Properties::all(),
            uuid: Uuid::from_u128(1),
        },
        EndpointInfo {
            name: "VM3",
            logical_id: LogicalId::Vm3,
            id: 3,
            el: None,
            ec_count: 1,
            properties: Properties::INDIRECT_MESSAGE,
            uuid: Uuid::from_u128(2),
        },
    ];

    type LogSinkImpl = LockedWriter<Uart<'static>>;

    fn make_log_sink() -> Self::LogSinkImpl {
        // SAFETY: `PL011_BASE_ADDRESS` is the base address of a PL011 device, and nothing else
        // accesses that address range.
        let uart_pointer = unsafe { UniqueMmioPointer::new(PL011_BASE_ADDRESS) };
        LockedWriter::new(Uart::new(uart_pointer))
    }

    #[unsafe(naked)]
    extern "C" fn core_position(mpidr: u64) -> usize {
        naked_asm!(
            // Check for MT bit in MPIDR. If not set, shift MPIDR to left to make it look as if in a
            // multi-threaded implementation.
            "tst	x0, #{MPIDR_MT_MASK}",
            "lsl	x3, x0, #{MPIDR_AFFINITY_BITS}",
            "csel	x3, x3, x0, eq",

            // Extract individual affinity fields from MPIDR.
            "ubfx	x0, x3, #{MPIDR_AFF0_SHIFT}, #{MPIDR_AFFINITY_BITS}",
            "ubfx	x1, x3, #{MPIDR_AFF1_SHIFT}, #{MPIDR_AFFINITY_BITS}",
            "ubfx	x2, x3, #{MPIDR_AFF2_SHIFT}, #{MPIDR_AFFINITY_BITS}",

            // Compute linear position.
            "mov	x3, #{FVP_MAX_CPUS_PER_CLUSTER}",
            "madd	x1, x2, x3, x1",
            "mov	x3, #{FVP_MAX_PE_PER_CPU}",
            "madd	x0, x1, x3, x0",
            "ret",
            MPIDR_MT_MASK = const MpidrEl1::MT.bits(),
            MPIDR_AFF0_SHIFT = const MpidrEl1::AFF0_SHIFT,
            MPIDR_AFF1_SHIFT = const MpidrEl1::AFF1_SHIFT,
            MPIDR_AFF2_SHIFT = const MpidrEl1::AFF2_SHIFT,
            FVP_MAX_CPUS_PER_CLUSTER = const FVP_MAX_CPUS_PER_CLUSTER,
            MPIDR_AFFINITY_BITS = const MpidrEl1::AFFINITY_BITS,
            FVP_MAX_PE_PER_CPU = const FVP_MAX_PE_PER_CPU,
        );
    }

    fn psci_mpidr_for_core(core_index: usize) -> u64 {
        assert!(core_index < Self::CORE_COUNT);

        #[allow(clippy::modulo_one)]
        let aff0 = (core_index % FVP_MAX_PE_PER_CPU) as u64;
        let aff1 = ((core_index / FVP_MAX_PE_PER_CPU) % FVP_MAX_CPUS_PER_CLUSTER) as u64;
        let aff2 = (core_index / FVP_MAX_PE_PER_CPU / FVP_MAX_CPUS_PER_CLUSTER) as u64;

        let mpidr_unshifted = aff0 << MpidrEl1::AFF0_SHIFT
            | aff1 << MpidrEl1::AFF1_SHIFT
            | aff2 << MpidrEl1::AFF2_SHIFT;

        if read_mpidr_el1() & MpidrEl1::MT != MpidrEl1::empty() {
            mpidr_unshifted
        } else {
            mpidr_unshifted << MpidrEl1::AFFINITY_BITS
        }
    }

    fn current_core() -> usize {
        Self::core_position(read_mpidr_el1().bits())
    }

    fn power_on_core(core_index: usize, arg: u64) -> Result<(), PowerOnError> {
        if core_index == 0 || core_index >= Self::CORE_COUNT {
            return Err(PowerOnError::InvalidCore(core_index));
        }
        psci::cpu_on::<Smc>(
            Self::psci_mpidr_for_core(core_index),
            secondary_entry as usize as u64,
            arg,
        )
        .map_err(|e| {
            error!("CPU_ON for core {core_index} returned {e:?}");
            PowerOnError::CpuOn(core_index)
        })
    }

    fn power_off_core() {
        if let Err(e) = psci::cpu_off::<Smc>() {
            error!("CPU_OFF returned {e:?}");
        }
    }

    fn watchdog_enable(load: u32) {
        watchdog().lock().enable(load);
    }

    fn watchdog_disable() {
        watchdog().lock().disable();
    }

    fn system_off() -> ! {
        let ret = psci::system_off::<Smc>();
        panic!("PSCI_SYSTEM_OFF returned {:?}", ret);
    }
}

// Secure partition image:
// 0x0600_0000 image
// 0x1C09_0000 PL011, 0x1C0F_0000 SP805
global_asm!(
    "
.section \".rodata.ACS_SP_IDMAP\", \"a\", %progbits
.global ACS_SP_IDMAP
.align 12
ACS_SP_IDMAP:
    .quad {TABLE_ATTRIBUTES} + 0f
    .fill 511, 8, 0x0

    /* level 2, 2 MiB block mappings */
0:
    .fill 48, 8, 0x0
    .quad {MEMORY_ATTRIBUTES} | 0x06000000
    .fill 175, 8, 0x0
    .quad {DEVICE_ATTRIBUTES} | 0x1c000000
    .fill 287, 8, 0x0
",
    DEVICE_ATTRIBUTES = const DEVICE_ATTRIBUTES.bits(),
    MEMORY_ATTRIBUTES = const MEMORY_ATTRIBUTES.bits(),
    TABLE_ATTRIBUTES = const Attributes::VALID.union(Attributes::TABLE_OR_PAGE).bits(),
);

// VM image:
// 0x1C09_0000 PL011
// 0x8000_0000 DRAM, including the image at 0x8800_0000
global_asm!(
    "
.section \".rodata.ACS_VM_IDMAP\", \"a\", %progbits
.global ACS_VM_IDMAP
.align 12
ACS_VM_IDMAP:
    .quad {TABLE_ATTRIBUTES} + 0f
    .fill 1, 8, 0x0
    .quad {MEMORY_ATTRIBUTES} | 0x80000000
    .fill 509, 8, 0x0

    /* level 2, 2 MiB block mappings */
0:
    .fill 224, 8, 0x0
    .quad {DEVICE_ATTRIBUTES} | 0x1c000000
    .fill 287, 8, 0x0
",
    DEVICE_ATTRIBUTES = const DEVICE_ATTRIBUTES.bits(),
    MEMORY_ATTRIBUTES = const MEMORY_ATTRIBUTES.bits(),
    TABLE_ATTRIBUTES = const Attributes::VALID.union(Attributes::TABLE_OR_PAGE).bits(),
);

unsafe extern "C" {
    pub static ACS_SP_IDMAP: InitialPagetable;
    pub static ACS_VM_IDMAP: InitialPagetable;
}
