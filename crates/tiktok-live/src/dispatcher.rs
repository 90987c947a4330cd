//! Host command dispatch and the stdin read loop.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::outbound::OutboundChannel;
use crate::protocol::{
    ACTION_START, ACTION_STOP, ActionData, HostCommand, PARAM_USERNAME, PluginInfo, StateId,
    find_param, status,
};
use crate::session::SessionController;

/// What the read loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The host asked the plugin to close
    Close,
}

/// Routes host commands to the session controller.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    controller: SessionController,
    outbound: OutboundChannel,
    info: PluginInfo,
}

impl CommandDispatcher {
    pub fn new(controller: SessionController, outbound: OutboundChannel) -> Self {
        Self {
            controller,
            outbound,
            info: PluginInfo::default(),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Route one command. Session commands are queued, not awaited.
    pub async fn handle(&self, command: HostCommand) -> Result<Dispatch> {
        match command {
            HostCommand::Info => {
                self.outbound.emit_info(&self.info)?;
            }
            HostCommand::Settings => {
                drop(self.controller.reset().await?);
            }
            HostCommand::Action { action_id, data } => {
                self.handle_action(&action_id, &data).await?;
            }
            HostCommand::ClosePlugin => {
                info!("Host requested close");
                return Ok(Dispatch::Close);
            }
            HostCommand::Unknown => {
                debug!("Ignoring unknown host message");
            }
        }
        Ok(Dispatch::Continue)
    }

    async fn handle_action(&self, action_id: &str, data: &[ActionData]) -> Result<()> {
        match action_id {
            ACTION_START => match find_param(data, PARAM_USERNAME) {
                Some(param) => {
                    drop(self.controller.start(&param.value_str()).await?);
                }
                None => {
                    warn!("Start action without a username");
                    self.outbound
                        .emit_state(StateId::Status, status::NO_USERNAME)?;
                }
            },
            ACTION_STOP => {
                drop(self.controller.stop().await?);
            }
            other => {
                debug!(action = other, "Ignoring unknown action");
            }
        }
        Ok(())
    }

    /// Decode and route one inbound line. Never fails; problems are logged or
    /// reported to the host.
    pub async fn handle_line(&self, line: &str) -> Dispatch {
        let line = line.trim();
        if line.is_empty() {
            return Dispatch::Continue;
        }

        let command = match HostCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Dropping malformed host message");
                return Dispatch::Continue;
            }
        };

        match self.handle(command).await {
            Ok(dispatch) => dispatch,
            Err(e) => {
                warn!(error = %e, "Failed to handle host message");
                if let Err(e) = self.outbound.emit_error(e.to_string()) {
                    warn!(error = %e, "Failed to report error to host");
                }
                Dispatch::Continue
            }
        }
    }
}

/// Read host lines until end of input or `closePlugin`, then shut the session
/// controller down.
pub async fn run_host_loop<R>(reader: R, dispatcher: &CommandDispatcher) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if dispatcher.handle_line(&line).await == Dispatch::Close {
                    break;
                }
            }
            Ok(None) => {
                info!("Host input closed");
                break;
            }
            Err(e) => {
                // Invalid UTF-8 consumes the line; anything else ends the input
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(error = %e, "Dropping unreadable host line");
                    continue;
                }
                warn!(error = %e, "Failed to read host input");
                break;
            }
        }
    }

    dispatcher.controller.shutdown().await
}
