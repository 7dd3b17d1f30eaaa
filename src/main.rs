//! FitCoach - 健身教练助手
//!
//! 入口：初始化日志、加载配置、组装教练核心，然后在终端逐行对话（流式输出，Ctrl+C 取消当前回复）。
//! 用法：fitcoach [config.toml]；/reset 结束当前会话并开新会话，/quit 退出。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use fitcoach::config::load_config;
use fitcoach::core::CoachBuilder;
use fitcoach::observability;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let coach = CoachBuilder::new(config)
        .build()
        .context("Failed to build coach")?;

    let mut session_id = format!("cli-{}", uuid::Uuid::new_v4());
    let user_id = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    tracing::info!(%session_id, "session started");
    println!("FitCoach ready. Type /reset for a new session, /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if utterance == "/quit" {
            break;
        }
        if utterance == "/reset" {
            coach
                .end_session(&session_id)
                .await
                .context("Failed to end session")?;
            session_id = format!("cli-{}", uuid::Uuid::new_v4());
            tracing::info!(%session_id, "session started");
            println!("Started a new session.");
            continue;
        }

        let cancel = CancellationToken::new();
        let mut on_chunk = |chunk: &str| {
            print!("{chunk}");
            std::io::stdout().flush().ok();
        };
        let turn = coach.orchestrator.handle_turn_streaming(
            &session_id,
            &user_id,
            utterance,
            &mut on_chunk,
            &cancel,
        );
        tokio::pin!(turn);
        let response = tokio::select! {
            response = &mut turn => response,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };
        println!();
        if response.cancelled {
            println!("(cancelled)");
        }
        tracing::debug!(
            intent = %response.intent,
            confidence = response.confidence,
            tool_calls = response.tool_calls.len(),
            "turn finished"
        );
    }

    coach.orchestrator.supervisor().shutdown();
    Ok(())
}
