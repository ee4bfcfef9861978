//! `torus` — command-line harness for the torus-mesh accelerator.
//!
//! ```text
//! USAGE:
//!   torus <machine> <trace>
//!
//!   <machine>   'real' (drive silicon) or 'emulated'
//!   <trace>     verbosity 0..=5: errors, warnings, info, debug,
//!               driver trace, full per-step trace
//! ```
//!
//! Runs the demo sequence on an 8×8 mesh — scalar fill, assign,
//! element-wise add, scalar scale, then the systolic matrix product —
//! gathering and checking every phase against a host reference. Numeric
//! mismatches are reported and counted but never abort the run; the
//! process exits non-zero only after the whole sequence has been driven.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use torus_chip::topology::MeshTopology;
use torus_driver::prelude::*;
use tracing_subscriber::EnvFilter;

/// Matrix side length; the mesh is brought up with matching dimensions.
const N: usize = 8;

#[derive(Parser)]
#[command(name = "torus", about = "Torus-mesh accelerator demo harness", version)]
struct Cli {
    /// Machine to drive.
    #[arg(value_enum)]
    machine: Machine,

    /// Trace verbosity, 0 (errors only) through 5 (per-step trace).
    #[arg(value_parser = clap::value_parser!(u8).range(0..=5))]
    trace: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Machine {
    /// Real silicon over the host link.
    Real,
    /// In-process emulator.
    Emulated,
}

fn trace_filter(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        4 => "torus_driver=trace,debug",
        _ => "trace",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(trace_filter(cli.trace))),
        )
        .init();

    let mode = match cli.machine {
        Machine::Real => ExecMode::Real,
        Machine::Emulated => ExecMode::Emulated,
    };

    let backend = select_backend(mode, MeshTopology::square(N))
        .context("bringing up the mesh machine")?;
    let mut session = MeshSession::new(backend).context("opening mesh session")?;

    let failed = run_demo(&mut session).context("driving the demo sequence")?;

    if let Some(cycles) = session.cycles_taken() {
        println!("Cycles taken: {cycles}");
    }

    if failed > 0 {
        println!("{failed} phase(s) off tolerance");
        std::process::exit(1);
    }
    println!("All phases within tolerance");
    Ok(())
}

/// Drive the buffered demo program phase by phase. Returns the number of
/// phases whose gathered result missed the tolerance.
fn run_demo(session: &mut MeshSession) -> Result<usize> {
    // The whole operation sequence is buffered first and materialized
    // into one kernel; nothing executes until start().
    let mut program = Program::new();
    program.compute(MatrixOp::ScalarSet(17.0));
    program.download_a();
    program.signal();
    program.upload_b();
    program.compute(MatrixOp::Assign);
    program.download_a();
    program.signal();
    program.compute(MatrixOp::Add);
    program.download_a();
    program.signal();
    program.compute(MatrixOp::ScalarMul(0.5));
    program.download_a();
    program.signal();
    program.compute(MatrixOp::Multiply);
    program.download_a();
    program.signal();

    session.load(&program)?;
    session.start()?;

    let b = HostMatrix::from_fn(N, |i, j| (i + j) as f32);
    let doubled = HostMatrix::from_fn(N, |i, j| 2.0 * (i + j) as f32);
    let product = reference_product(&b, &b)?;

    let mut failed = 0;

    // Phase 1: A := 17. The operand upload rides on this phase's pause.
    let report = check_phase(session, "A=17", &HostMatrix::filled(N, 17.0), Some(&b))?;
    failed += usize::from(!report.passed());

    // Phase 2: A := B.
    let report = check_phase(session, "A=B", &b, None)?;
    failed += usize::from(!report.passed());

    // Phase 3: A := A + B.
    let report = check_phase(session, "A=A+B", &doubled, None)?;
    failed += usize::from(!report.passed());

    // Phase 4: A := A * 0.5.
    let report = check_phase(session, "A*=0.5", &b, None)?;
    failed += usize::from(!report.passed());

    // Phase 5: A := A * B.
    let report = check_phase(session, "A=A*B", &product, None)?;
    failed += usize::from(!report.passed());

    Ok(failed)
}

/// Service one signal pause: gather A, compare against the phase's
/// reference, optionally stage the next operand, resume the machine.
fn check_phase(
    session: &mut MeshSession,
    label: &str,
    expected: &HostMatrix,
    next_operand: Option<&HostMatrix>,
) -> Result<CheckReport> {
    session.wait_signal()?;
    let actual = session.read_matrix()?;
    let report = check_matrix(label, &actual, expected)?;

    println!("{}", report.summary());
    for m in report.mismatches() {
        println!(
            "  A[{}][{}] = {:e} but expected {:e}",
            m.row, m.col, m.actual, m.expected
        );
    }

    if let Some(operand) = next_operand {
        session.write_matrix(operand)?;
    }
    session.clear_signal()?;
    Ok(report)
}
