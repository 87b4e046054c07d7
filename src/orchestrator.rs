//! Interactive chat loop.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::history::ChatHistory;
use crate::kernel::Kernel;

pub struct Orchestrator {
    kernel: Kernel,
}

impl Orchestrator {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Read questions line by line until `exit` or end of input.
    pub async fn run<R, W>(&self, history: &mut ChatHistory, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        loop {
            writer.write_all(b"User > ").await?;
            writer.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.eq_ignore_ascii_case("exit") {
                break;
            }
            if input.is_empty() {
                continue;
            }

            match self.kernel.message(input, history).await {
                Ok(response) => {
                    writer
                        .write_all(format!("Assistant > {}\n", response).as_bytes())
                        .await?;
                }
                Err(e) => {
                    tracing::error!("Error: {:#}", e);
                    return Err(e);
                }
            }
        }

        writer.write_all(b"\nExiting chat...\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ExecutionSettings;
    use crate::llm::testing::{text, ScriptedModel};
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn orchestrator(turns: Vec<crate::llm::ModelTurn>) -> Orchestrator {
        let model = Arc::new(ScriptedModel::new(turns));
        Orchestrator::new(Kernel::new(
            model,
            ToolRegistry::new(),
            ExecutionSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_repl_skips_blank_lines_and_stops_on_exit() {
        let orch = orchestrator(vec![text("Hi there."), text("Bye.")]);
        let mut history = ChatHistory::with_system_message("sys");
        let input: &[u8] = b"hello\n\n   \nthanks\nexit\nnever read\n";
        let mut output = Vec::new();

        orch.run(&mut history, input, &mut output).await.unwrap();

        let out = String::from_utf8(output).unwrap();
        assert!(out.contains("Assistant > Hi there.\n"));
        assert!(out.contains("Assistant > Bye.\n"));
        assert!(out.ends_with("Exiting chat...\n"));
        // system + two user/assistant pairs
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_repl_ends_at_eof() {
        let orch = orchestrator(vec![text("ok")]);
        let mut history = ChatHistory::new();
        let input: &[u8] = b"question";
        let mut output = Vec::new();

        orch.run(&mut history, input, &mut output).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_repl_returns_model_errors() {
        let orch = orchestrator(vec![]);
        let mut history = ChatHistory::new();
        let input: &[u8] = b"hi\n";
        let mut output = Vec::new();

        assert!(orch.run(&mut history, input, &mut output).await.is_err());
    }
}
