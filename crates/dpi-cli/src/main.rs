//! `dpi` — command-line bring-up tool for CN10K DPI DMA virtual functions.
//!
//! ```text
//! USAGE:
//!   dpi setup -a <pci-addr> [--mps N] [--mrrs N] [--fifo-mask M] [--port P]
//!                                    Full bring-up: PF tuning, VFIO bind,
//!                                    queue open/enable, then teardown
//!   dpi enumerate                    List DPI VFs and their binding state
//!   dpi info <pci-addr>              IOMMU group and register snapshot
//!   dpi bind-vfio <pci-addr>         Bind a VF to vfio-pci (root)
//!   dpi unbind-vfio <pci-addr>       Unbind a VF from vfio-pci (root)
//!   dpi iommu-group <pci-addr>       Print the VF's IOMMU group
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dpi_chip::addr::PciAddress;
use dpi_driver::{DpiPf, DpiVf, EngineCfg, MpsMrrsCfg, VfioDevice};

/// PCIe payload bounds the PF accepts, bytes.
const MPS_RANGE: std::ops::RangeInclusive<i64> = 128..=1024;
/// PCIe read-request bounds the PF accepts, bytes.
const MRRS_RANGE: std::ops::RangeInclusive<i64> = 128..=1024;

#[derive(Parser)]
#[command(name = "dpi", about = "Marvell CN10K DPI DMA engine CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Configure the engine and bring one VF's DMA queue up, then tear it
    /// down again.
    Setup {
        /// PCI address of the DPI VF (e.g. 0000:06:00.1).
        #[arg(short = 'a', long = "addr")]
        addr: PciAddress,
        /// Max payload size of PCIe transactions, bytes.
        #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u16).range(MPS_RANGE))]
        mps: u16,
        /// Max PCIe read request size, bytes.
        #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u16).range(MRRS_RANGE))]
        mrrs: u16,
        /// FIFO size mask of the DMA engines (decimal or 0x-hex).
        #[arg(long, default_value = "0x10101010", value_parser = parse_u64)]
        fifo_mask: u64,
        /// PEM (Ebus) port the MPS/MRRS parameters apply to.
        #[arg(long, default_value_t = 0)]
        port: u16,
        /// Aura (memory-pool handle) backing the command buffer.
        #[arg(long, default_value = "0", value_parser = parse_u32)]
        aura: u32,
    },
    /// List all DPI VFs and their binding state.
    Enumerate,
    /// Print IOMMU and register details for one VF (must be vfio-pci bound).
    Info {
        /// PCI address (e.g. 0000:06:00.1).
        addr: PciAddress,
    },
    /// Bind a VF to vfio-pci (requires root / CAP_SYS_ADMIN).
    BindVfio {
        /// PCI address (e.g. 0000:06:00.1).
        addr: PciAddress,
    },
    /// Unbind a VF from vfio-pci.
    UnbindVfio {
        /// PCI address (e.g. 0000:06:00.1).
        addr: PciAddress,
    },
    /// Query the IOMMU group for a VF.
    IommuGroup {
        /// PCI address (e.g. 0000:06:00.1).
        addr: PciAddress,
    },
}

fn parse_u64(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    parse_u64(s)?
        .try_into()
        .map_err(|_| format!("{s} does not fit in 32 bits"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Setup {
            addr,
            mps,
            mrrs,
            fifo_mask,
            port,
            aura,
        } => cmd_setup(&addr, mps, mrrs, fifo_mask, port, aura)?,
        Cmd::Enumerate => cmd_enumerate()?,
        Cmd::Info { addr } => cmd_info(&addr)?,
        Cmd::BindVfio { addr } => {
            dpi_driver::vfio::bind_to_vfio(&addr)?;
            println!("{addr} bound to vfio-pci (IOMMU group {})", dpi_driver::vfio::iommu_group(&addr)?);
        }
        Cmd::UnbindVfio { addr } => {
            dpi_driver::vfio::unbind_from_vfio(&addr)?;
            println!("{addr} unbound from vfio-pci");
        }
        Cmd::IommuGroup { addr } => {
            let group = dpi_driver::vfio::iommu_group(&addr)?;
            println!("IOMMU group for {addr}: {group}");
            println!("Device file: /dev/vfio/{group}");
        }
    }

    Ok(())
}

/// The full bring-up sequence, mirroring the engine's required ordering:
/// PF global tuning first, then the VF queue, teardown in reverse.
fn cmd_setup(
    addr: &PciAddress,
    mps: u16,
    mrrs: u16,
    fifo_mask: u64,
    port: u16,
    aura: u32,
) -> Result<()> {
    let pf = DpiPf::open().context("PF control node")?;

    let vfio = VfioDevice::bind(addr).context("VFIO bind")?;
    let vf = DpiVf::attach(&vfio).context("VF attach")?;
    println!("{addr}: VF {} bound (IOMMU group {})", vf.vf_index(), vfio.iommu_group());

    pf.set_mps_mrrs(&MpsMrrsCfg {
        max_read_req_sz: mrrs,
        max_payload_sz: mps,
        port,
        reserved: 0,
    })
    .context("MPS/MRRS configuration")?;

    pf.configure_engines(&EngineCfg {
        fifo_mask,
        molr: Default::default(),
        update_molr: 0,
        reserved: 0,
    })
    .context("engine FIFO configuration")?;

    let version = vf.open_with_fallback(aura).context("queue open")?;
    vf.enable();
    println!("{addr}: queue configured and enabled ({version:?})");
    tracing::debug!("{:x?}", vf.registers());

    // Nothing submits work in this tool; the queue comes straight back down.
    vf.disable();
    if let Err(e) = vf.close() {
        // Teardown of the VFIO handles still proceeds below.
        tracing::error!("queue close failed: {e}");
    }
    println!("{addr}: queue disabled and closed");

    Ok(())
}

fn cmd_enumerate() -> Result<()> {
    let vfs = dpi_driver::enumerate_vfs()?;
    if vfs.is_empty() {
        println!("No DPI VFs found (lspci -d {})", dpi_chip::pcie::lspci_filter());
        return Ok(());
    }

    println!("DPI VFs: {}", vfs.len());
    for info in &vfs {
        let group = info
            .iommu_group
            .map_or_else(|| "-".to_string(), |g| g.to_string());
        let driver = info.driver.as_deref().unwrap_or("(none)");
        let vf_index = info
            .pcie_address
            .parse::<PciAddress>()
            .ok()
            .and_then(|a| a.vf_index().ok());
        match vf_index {
            Some(idx) => println!("  {}  vf={idx}  group={group}  driver={driver}", info.pcie_address),
            None => println!("  {}  group={group}  driver={driver}", info.pcie_address),
        }
    }
    Ok(())
}

fn cmd_info(addr: &PciAddress) -> Result<()> {
    println!("PCI address : {addr}");
    println!("VF index    : {}", addr.vf_index()?);

    match dpi_driver::vfio::iommu_group(addr) {
        Ok(g) => println!("IOMMU group : {g}"),
        Err(_) => println!("IOMMU group : (not available — IOMMU disabled?)"),
    }

    // A register snapshot needs the VF bound to vfio-pci.
    let vfio = VfioDevice::bind(addr).context("VFIO bind (is the VF bound to vfio-pci?)")?;
    let vf = DpiVf::attach(&vfio)?;
    let snapshot = vf.registers();
    println!("VDMA_EN     : {:#x}", snapshot.en);
    println!("VDMA_SADDR  : {:#x}", snapshot.saddr);
    println!("VDMA_COUNTS : {:#x}", snapshot.counts);
    println!("VDMA_CNT    : {:#x}", snapshot.cnt);
    println!("idle        : {}", snapshot.saddr & dpi_chip::regs::saddr::IDLE != 0);

    Ok(())
}
