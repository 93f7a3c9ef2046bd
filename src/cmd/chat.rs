//! Interactive session: `backforge chat <project>`.

use anyhow::Result;
use backforge::config::Config;
use backforge::orchestrator::{
    Capabilities, Inbound, Orchestrator, SessionChannels, SessionSettings,
};
use backforge::state::StateStore;
use backforge::ui::SessionUI;
use console::style;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::open_store;

/// What a line typed at the prompt means.
fn parse_input(line: &str) -> Option<Option<Inbound>> {
    match line.trim() {
        "" => Some(None),
        "/quit" | "/exit" => None,
        "/stop" => Some(Some(Inbound::Stop)),
        text => Some(Some(Inbound::UserMessage(text.to_string()))),
    }
}

/// Blocking stdin reader on its own thread; tokio's stdin would keep the
/// runtime alive on exit while a read is pending.
fn spawn_reader(inbox: mpsc::Sender<Inbound>, quit: oneshot::Sender<()>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_input(&line) {
                None => break,
                Some(None) => continue,
                Some(Some(inbound)) => {
                    if inbox.blocking_send(inbound).is_err() {
                        break;
                    }
                }
            }
        }
        quit.send(()).ok();
    });
}

pub async fn cmd_chat(config: &Config, project_id: &str) -> Result<()> {
    config.ensure_directories()?;
    let store: Arc<dyn StateStore> = Arc::new(open_store(config)?);
    let caps = Capabilities::from_config(config)?;
    let orchestrator = Orchestrator::new(caps, store, SessionSettings::from_config(config));
    let SessionChannels { inbox, mut events } = orchestrator.open_session(project_id).await?;

    let ui = if console::Term::stdout().is_term() {
        SessionUI::new(config.verbose)
    } else {
        SessionUI::hidden(config.verbose)
    };
    println!(
        "{} Describe the backend you want. {} cancels the current step, {} leaves.",
        style("backforge").bold().cyan(),
        style("/stop").bold(),
        style("/quit").bold()
    );

    let (quit_tx, mut quit_rx) = oneshot::channel();
    spawn_reader(inbox, quit_tx);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => ui.render(&event),
                None => break,
            },
            _ = &mut quit_rx => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    ui.finish();

    if let Some(state) = orchestrator.close_session(project_id).await? {
        println!(
            "Session closed in the {} phase. Resume with: backforge chat {}",
            state.phase, project_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_commands() {
        assert_eq!(parse_input("  "), Some(None));
        assert_eq!(parse_input("/quit"), None);
        assert_eq!(parse_input("/stop"), Some(Some(Inbound::Stop)));
        assert_eq!(
            parse_input("add a Review entity\n"),
            Some(Some(Inbound::UserMessage("add a Review entity".into())))
        );
    }
}
