use std::{
    env,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};

const EBPF_BINARY: &str = "netmonpf";

fn main() -> Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR not set")?);
    let out_file = out_dir.join(EBPF_BINARY);

    println!("cargo:rerun-if-changed=../netmonpf-ebpf/src");
    println!("cargo:rerun-if-changed=../netmonpf-common/src");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH not set")?;
    let bpf_target = match arch.as_str() {
        "mips" | "mips64" | "powerpc" | "powerpc64" | "s390x" => "bpfeb-unknown-none",
        _ => "bpfel-unknown-none",
    };

    // Separate target dir so the nested cargo does not wait on our build lock.
    let ebpf_target_dir = out_dir.join("ebpf-target");

    match build_ebpf(bpf_target, &ebpf_target_dir) {
        Ok(binary) => {
            std::fs::copy(&binary, &out_file)
                .with_context(|| format!("Failed to copy {}", binary.display()))?;
        }
        Err(e) => {
            // Host-only builds (tests, docs) still work; loading fails at runtime.
            println!("cargo:warning=eBPF build skipped: {e:#}");
            std::fs::write(&out_file, []).context("Failed to write empty eBPF object")?;
        }
    }

    Ok(())
}

fn build_ebpf(bpf_target: &str, target_dir: &Path) -> Result<PathBuf> {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());

    let status = Command::new(cargo)
        .current_dir("../netmonpf-ebpf")
        .env("RUSTUP_TOOLCHAIN", "nightly")
        .env("CARGO_TARGET_DIR", target_dir)
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .args([
            "build",
            "--release",
            &format!("--target={bpf_target}"),
            "-Z",
            "build-std=core",
        ])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute cargo command")?;

    if !status.success() {
        bail!("cargo build for {bpf_target} exited with {status}");
    }

    Ok(target_dir.join(format!("{bpf_target}/release/{EBPF_BINARY}")))
}
