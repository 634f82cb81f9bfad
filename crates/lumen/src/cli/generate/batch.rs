//! Batch run: progress bar, Ctrl-C cancellation, skip-existing, and streaming output.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use lumen_core::output::{completed_prompts, load_records};
use lumen_core::{BatchUpdate, JobRecord, JobState, OutputFormat, OutputWriter};

use super::GenerateContext;

/// Run the batch and write results to `output` (or stdout).
pub async fn run_generation(
    ctx: GenerateContext,
    references: &[String],
    output: Option<&Path>,
    skip_existing: bool,
) -> anyhow::Result<()> {
    let provider_name = ctx.provider.name().to_string();
    let model = ctx.provider.model().to_string();

    // Records from an earlier run, for --skip-existing
    let existing = match output.filter(|p| skip_existing && p.exists()) {
        Some(path) => load_records(path)?,
        None => Vec::new(),
    };
    let mut skipped = HashSet::new();
    for (reference, prompt) in completed_prompts(&existing) {
        if references.contains(&reference) {
            skipped.insert(reference.clone());
        }
        ctx.orchestrator.seed_completed(reference, prompt);
    }
    if !skipped.is_empty() {
        tracing::info!("Skipping {} image(s) with existing prompts", skipped.len());
    }

    // JSONL is streamed as jobs finish; JSON needs the whole batch for the array.
    let streaming = ctx.output_format == OutputFormat::JsonLines;
    let mut stream: Option<OutputWriter<Box<dyn Write>>> = if streaming {
        let sink: Box<dyn Write> = match output {
            Some(path) if skip_existing && path.exists() => Box::new(BufWriter::new(
                std::fs::OpenOptions::new().append(true).open(path)?,
            )),
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        };
        Some(OutputWriter::new(sink, ctx.output_format, false))
    } else {
        None
    };

    let interrupt = {
        let orchestrator = ctx.orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let dropped = orchestrator.cancel_pending_requests();
                tracing::warn!(
                    "Interrupted: cancelled {dropped} queued request(s), waiting for requests in flight"
                );
            }
        })
    };

    let progress = create_progress_bar(references.len() as u64);
    let start_time = std::time::Instant::now();
    let mut write_error: Option<io::Error> = None;

    let report = ctx
        .orchestrator
        .run_batch(references, ctx.provider.clone(), |update| match update {
            BatchUpdate::Progress(snapshot) => {
                progress.set_position(snapshot.completed as u64);
            }
            BatchUpdate::Job(job) => {
                match job.state {
                    JobState::Retrying => {
                        if let Some(reason) = &job.failure_reason {
                            progress.set_message(reason.clone());
                        }
                    }
                    JobState::Failed => {
                        progress.suspend(|| {
                            tracing::error!(
                                "Failed: {} - {}",
                                job.reference,
                                job.failure_reason.as_deref().unwrap_or("unknown error")
                            )
                        });
                    }
                    JobState::Completed => {
                        progress.set_message(format!("done {}", short_reference(&job.reference)));
                    }
                    JobState::Pending | JobState::Generating => {}
                }

                if job.state.is_terminal() {
                    if let Some(writer) = stream.as_mut().filter(|_| write_error.is_none()) {
                        let record = JobRecord::from_job(&job, &provider_name, &model);
                        if let Err(e) = writer.write_line(&record).and_then(|_| writer.flush()) {
                            write_error = Some(e);
                        }
                    }
                }
            }
        })
        .await;
    interrupt.abort();
    progress.finish_and_clear();

    if let Some(e) = write_error {
        return Err(e.into());
    }

    if let Some(mut writer) = stream {
        writer.flush()?;
    } else {
        let processed: HashSet<&str> = report
            .jobs
            .iter()
            .filter(|j| !skipped.contains(&j.reference))
            .map(|j| j.reference.as_str())
            .collect();
        let mut records: Vec<JobRecord> = existing
            .into_iter()
            .filter(|r| !processed.contains(r.reference.as_str()))
            .collect();
        records.extend(
            report
                .jobs
                .iter()
                .filter(|j| processed.contains(j.reference.as_str()))
                .map(|j| JobRecord::from_job(j, &provider_name, &model)),
        );

        match output {
            Some(path) => {
                let mut writer =
                    OutputWriter::new(BufWriter::new(File::create(path)?), ctx.output_format, ctx.pretty);
                writer.write_batch(&records)?;
                writer.flush()?;
            }
            None => {
                let mut writer = OutputWriter::new(io::stdout().lock(), ctx.output_format, true);
                writer.write_batch(&records)?;
                writer.flush()?;
            }
        }
    }
    if let Some(path) = output {
        tracing::info!("Output written to {:?}", path);
    }

    let succeeded = report.succeeded().saturating_sub(skipped.len());
    let failed = report.failed();
    print_summary(succeeded, failed, skipped.len(), start_time.elapsed());

    if succeeded == 0 && failed > 0 {
        anyhow::bail!("All {failed} image(s) failed");
    }
    Ok(())
}

/// Last path segment of a URL or path, for progress messages.
fn short_reference(reference: &str) -> &str {
    if reference.starts_with("data:") {
        return "data URI";
    }
    reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(reference)
}

/// Create a progress bar for the batch.
fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_message("starting...");
    pb
}

/// Print a formatted summary table after the batch.
fn print_summary(succeeded: usize, failed: usize, skipped: usize, elapsed: std::time::Duration) {
    let total = succeeded + failed + skipped;
    let rate = if elapsed.as_secs_f64() > 0.0 {
        (succeeded + failed) as f64 * 60.0 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Succeeded:    {:>8}", succeeded);
    if failed > 0 {
        eprintln!("    Failed:       {:>8}", failed);
    }
    if skipped > 0 {
        eprintln!("    Skipped:      {:>8}", skipped);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", total);
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("    Rate:         {:>7.1} img/min", rate);
    eprintln!("  ====================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reference_uses_last_segment() {
        assert_eq!(short_reference("https://example.com/photos/cat.jpg"), "cat.jpg");
        assert_eq!(short_reference("/tmp/images/dog.png"), "dog.png");
        assert_eq!(short_reference("https://example.com/"), "example.com");
        assert_eq!(short_reference("data:image/png;base64,AQID"), "data URI");
        assert_eq!(short_reference("plain"), "plain");
    }
}
