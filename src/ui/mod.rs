//! Terminal rendering of session events.

pub mod icons;

use crate::orchestrator::events::OutboundEvent;
use crate::state::shared::StatusReport;
use console::style;
use icons::{ASSISTANT, CHECK, CROSS, FILE_NEW, PHASE, QUESTION, RUNNING, SPARKLE, STOP, TOOL, WARN};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Renders events for `backforge chat`.
///
/// A spinner shows the active task while agents work; every other event is
/// printed above it so the spinner never garbles output.
pub struct SessionUI {
    spinner: ProgressBar,
    verbose: bool,
}

impl SessionUI {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        Self { spinner, verbose }
    }

    /// A UI that never draws. Used when output is not a terminal.
    pub fn hidden(verbose: bool) -> Self {
        Self {
            spinner: ProgressBar::hidden(),
            verbose,
        }
    }

    pub fn render(&self, event: &OutboundEvent) {
        match event {
            OutboundEvent::TaskStarted {
                task_id,
                description,
                ..
            } => {
                self.spinner
                    .enable_steady_tick(Duration::from_millis(120));
                self.spinner.set_message(format!("{task_id}: {description}"));
            }
            OutboundEvent::TaskCompleted { .. }
            | OutboundEvent::Error { .. }
            | OutboundEvent::Stopped
            | OutboundEvent::AskUser { .. }
            | OutboundEvent::BuildComplete { .. } => {
                self.spinner.disable_steady_tick();
                self.spinner.set_message("");
            }
            _ => {}
        }
        if let Some(line) = format_event(event, self.verbose) {
            self.spinner.suspend(|| println!("{line}"));
        }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

/// One printable line (or block) per event. `None` hides the event.
pub fn format_event(event: &OutboundEvent, verbose: bool) -> Option<String> {
    let line = match event {
        OutboundEvent::StateUpdate { phase, .. } => {
            if !verbose {
                return None;
            }
            format!("{}phase: {}", PHASE, style(phase).dim())
        }
        OutboundEvent::PhaseTransition { from, to } => format!(
            "{}{} → {}",
            PHASE,
            style(from).dim(),
            style(to).bold().cyan()
        ),
        OutboundEvent::AskUser { question, options } => {
            let mut out = format!("{}{}", QUESTION, style(question).bold());
            for (i, option) in options.iter().enumerate() {
                out.push_str(&format!("\n   {}. {}", i + 1, option));
            }
            out
        }
        OutboundEvent::Message { text } => format!("{ASSISTANT}{text}"),
        OutboundEvent::Warning { message } => {
            format!("{}{}", WARN, style(message).yellow())
        }
        OutboundEvent::Error {
            message,
            task_id,
            file,
            line,
        } => {
            let mut out = format!("{}{}", CROSS, style(message).red().bold());
            let location = match (file, line) {
                (Some(f), Some(l)) => Some(format!("{f}:{l}")),
                (Some(f), None) => Some(f.clone()),
                _ => None,
            };
            if let Some(location) = location {
                out.push_str(&format!("\n   at {}", style(location).dim()));
            }
            if let Some(id) = task_id {
                out.push_str(&format!("\n   task {}", style(id).dim()));
            }
            out
        }
        OutboundEvent::Stopped => format!("{}{}", STOP, style("Stopped.").yellow()),
        OutboundEvent::TaskStarted {
            task_id,
            role,
            description,
        } => format!(
            "{}{} [{}] {}",
            RUNNING,
            style(task_id).bold(),
            style(role).cyan(),
            description
        ),
        OutboundEvent::TaskCompleted { task_id, files } => {
            let mut out = format!("{}{}", CHECK, style(task_id).green());
            if verbose {
                for file in files {
                    out.push_str(&format!("\n   {FILE_NEW}{file}"));
                }
            } else if !files.is_empty() {
                out.push_str(&format!(" ({} files)", files.len()));
            }
            out
        }
        OutboundEvent::ToolProgress {
            tool,
            arguments,
            result,
            ..
        } => {
            if !verbose {
                return None;
            }
            let mut out = format!("   {}{} {}", TOOL, tool, style(arguments).dim());
            if let Some(result) = result {
                out.push_str(&format!(" → {}", style(result).dim()));
            }
            out
        }
        OutboundEvent::BuildComplete {
            swagger_url,
            api_url,
        } => format!(
            "{}{}\n   API:  {}\n   Docs: {}",
            SPARKLE,
            style("Your backend is running!").green().bold(),
            style(api_url).underlined(),
            style(swagger_url).underlined()
        ),
    };
    Some(line)
}

/// Multi-line status block for `backforge status`.
pub fn format_status(report: &StatusReport) -> String {
    let mut out = format!(
        "{} {}\n  phase:   {}\n  tasks:   {}/{} done",
        style("Project").bold(),
        report.project_id,
        style(report.phase).cyan(),
        report.tasks_done,
        report.tasks_total
    );
    if report.tasks_failed > 0 {
        out.push_str(&format!(
            ", {}",
            style(format!("{} failed", report.tasks_failed)).red()
        ));
    }
    out.push_str(&format!("\n  files:   {}", report.files_created));
    out.push_str(&format!("\n  errors:  {}", report.errors));
    if let Some(last) = &report.last_error {
        out.push_str(&format!("\n  last:    {}", style(last).red()));
    }
    if let Some(api) = &report.api_url {
        out.push_str(&format!("\n  api:     {api}"));
    }
    if let Some(docs) = &report.swagger_url {
        out.push_str(&format!("\n  docs:    {docs}"));
    }
    if let Some(reason) = &report.suspended {
        out.push_str(&format!("\n  {}", style(format!("suspended: {reason}")).yellow()));
    }
    if let Some(question) = &report.awaiting_answer {
        out.push_str(&format!("\n  waiting: {question}"));
    }
    out
}
