//! Update session on an emulated dock

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use dockfw_core::orchestrator::{PackageLocations, PollResult, SessionSummary};
use dockfw_core::package::Candidate;
use dockfw_core::platform::SignatureVerifier;
use dockfw_core::update::UpdateState;

use super::{load_dock, read_file, OpenDock, PackageKey};
use crate::cli::DockArgs;

/// What to update with
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub package: PathBuf,
    pub factory: Option<PathBuf>,
    pub public_key: Option<String>,
    pub force: bool,
    pub prefer_factory: bool,
}

/// Create a progress bar counting rows for one device
fn create_row_bar(total: u64, label: &str) -> Result<ProgressBar, Box<dyn Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} rows {}",
                label
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress reporter with one bar per flashed device
struct RowProgress {
    multi: MultiProgress,
    current: Option<(usize, ProgressBar)>,
}

impl RowProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current: None,
        }
    }

    fn update(&mut self, index: usize, label: &str, rows: (u32, u32)) {
        let (done, total) = rows;
        let same = matches!(&self.current, Some((i, _)) if *i == index);
        if !same {
            self.finish();
            let pb = self.multi.add(
                create_row_bar(total as u64, label).unwrap_or_else(|_| ProgressBar::new(total as u64)),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            self.current = Some((index, pb));
        }
        if let Some((_, pb)) = &self.current {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        }
    }

    fn finish(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.finish();
        }
    }
}

/// Poll the session to its end, drawing row progress as devices flash
fn drive<V: SignatureVerifier>(open: &mut OpenDock<V>) -> Result<SessionSummary, Box<dyn Error>> {
    let config = open.config().clone();
    let mut progress = RowProgress::new();
    loop {
        match open.dmc.poll()? {
            PollResult::Stepped { index, state } => {
                let label = config
                    .devices
                    .get(index)
                    .map(|d| format!("device {} ({})", index, d.device_type))
                    .unwrap_or_default();
                match open.dmc.active_device() {
                    Some((active, UpdateState::Flashing { .. } | UpdateState::Finishing, rows))
                        if active == index =>
                    {
                        progress.update(index, &label, rows)
                    }
                    _ if state.is_terminal() => progress.finish(),
                    _ => {}
                }
            }
            PollResult::Finished(summary) => {
                progress.finish();
                return Ok(summary);
            }
            PollResult::Idle => return Err("update session vanished".into()),
        }
    }
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "Session finished: {:?} ({} updated, {} current, {} failed)",
        summary.status, summary.updated, summary.current, summary.failed
    );
    if summary.deferred_critical > 0 {
        println!(
            "{} critical device(s) wait for phase 2 (run trigger-phase2, then update again)",
            summary.deferred_critical
        );
    }
}

pub fn cmd_update(args: &DockArgs, opts: &UpdateOptions) -> Result<(), Box<dyn Error>> {
    let key = PackageKey::from_hex(opts.public_key.as_deref())?;
    let mut dock = load_dock(args)?;
    dock.stage_package(Candidate::Primary, &read_file(&opts.package)?)?;
    if let Some(factory) = &opts.factory {
        dock.stage_package(Candidate::Factory, &read_file(factory)?)?;
    }

    let mut open = OpenDock::open(dock, key)?;
    if opts.force {
        open.dmc.set_force_update(true)?;
    }
    open.dmc.set_factory_candidate(opts.prefer_factory)?;

    log::debug!("app status before session: {:?}", open.dmc.metadata().app_status);

    let registry = open.registry();
    let started =
        open.dmc
            .start_update_session(registry, &mut open.packages, PackageLocations::default());
    let result = match started {
        Ok(()) => drive(&mut open).map(|summary| {
            print_summary(&summary);
            summary
        }),
        Err(e) => {
            println!("No update: {:?}", open.dmc.dock_status());
            Err(e.into())
        }
    };

    // Whatever happened, the dock keeps what was written.
    open.save(&args.state)?;
    result.and_then(|summary| {
        if summary.failed > 0 || summary.aborted {
            Err(format!("{} device(s) failed", summary.failed).into())
        } else {
            Ok(())
        }
    })
}
