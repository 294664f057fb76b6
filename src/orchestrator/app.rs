//! 命令行答题应用 - 编排层
//!
//! ## 职责
//!
//! 本模块是二进制程序的入口：加载配置、连接考试服务、打开会话，
//! 然后把标准输入的每一行命令翻译成对会话的调用。
//!
//! ## 命令
//!
//! - `answer <题号> <答案>` / `multi <题号> A,B` - 作答
//! - `save` - 手动保存
//! - `submit` 然后 `yes` - 确认交卷
//! - `hide` / `show` - 模拟切出、切回页面
//! - `copy` / `cut` / `paste` / `menu` - 模拟剪贴板与右键
//! - `status` / `help` / `quit`
//!
//! 任何一行输入都算一次键盘操作，会重置空闲计时。

use crate::clients::{HttpExamClient, SharedApi};
use crate::config::Config;
use crate::infrastructure::{LocalCache, SystemClock};
use crate::models::AnswerValue;
use crate::orchestrator::exam_session::ExamSession;
use crate::services::{ClipboardAction, IntegrityHooks, InteractionKind, Notice, SaveOutcome};
use crate::utils::logging::{format_remaining, truncate_text};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    session: ExamSession,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let api: SharedApi = Arc::new(HttpExamClient::new(&config)?);
        let cache = match &config.cache_dir {
            Some(dir) => LocalCache::with_dir(dir),
            None => LocalCache::in_memory(),
        };
        let session = ExamSession::open(&config, api, cache, Arc::new(SystemClock)).await?;

        Ok(Self { config, session })
    }

    /// 运行应用主逻辑，交卷成功或输入 quit 时返回
    pub async fn run(mut self) -> Result<()> {
        print_help();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut awaiting_confirmation = false;

        loop {
            tokio::select! {
                notice = self.session.next_notice() => {
                    let Some(notice) = notice else { break };
                    if self.show_notice(&notice) {
                        break;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("输入已结束，保存并退出");
                        break;
                    };
                    self.session.integrity().on_interaction(InteractionKind::KeyPress);

                    let command = Command::parse(&line);
                    if awaiting_confirmation {
                        awaiting_confirmation = false;
                        if command == Command::Confirm {
                            self.submit().await;
                            continue;
                        }
                        info!("已取消交卷");
                    }
                    match command {
                        Command::Quit => break,
                        Command::Submit => {
                            let confirmation = self.session.confirm_submit();
                            info!("{} (输入 yes 确认)", confirmation.prompt());
                            awaiting_confirmation = true;
                        }
                        other => self.execute(other).await,
                    }
                }
            }
        }

        let outcome = self.session.close().await;
        if let SaveOutcome::Failed { message, .. } = outcome {
            warn!("⚠️ 退出前保存失败，答案仍保留在本地缓存: {}", message);
        }
        if self.config.verbose_logging {
            info!("缓存目录: {:?}", self.config.cache_dir);
        }
        Ok(())
    }

    async fn execute(&self, command: Command) {
        let session = &self.session;
        match command {
            Command::Answer { question_id, value } => {
                if let Err(e) = session.answer(question_id, value) {
                    warn!("⚠️ {}", e);
                }
            }
            Command::Save => match session.save_now().await {
                SaveOutcome::Saved => info!("✓ 已保存"),
                SaveOutcome::Clean => info!("没有需要保存的答案"),
                SaveOutcome::Failed { message, .. } => warn!("⚠️ 保存失败: {}", message),
            },
            Command::Visibility { hidden } => session.integrity().on_visibility_change(hidden),
            Command::Clipboard(action) => {
                session.integrity().on_clipboard_attempt(action);
            }
            Command::Status => self.print_status(),
            Command::Help => print_help(),
            Command::Unknown(line) => warn!("未知命令: {}", truncate_text(&line, 40)),
            Command::Submit | Command::Confirm | Command::Quit => {}
        }
    }

    async fn submit(&self) {
        match self.session.submit().await {
            Ok(report) => info!("✓ 交卷完成: 考核结果 #{}", report.receipt.result_id),
            Err(e) => error!("❌ {}，可以再次输入 submit 重试", e),
        }
    }

    fn print_status(&self) {
        let session = self.session.session();
        let answers = self.session.answers();
        info!("{}", "─".repeat(60));
        info!("剩余时间: {}", format_remaining(self.session.remaining()));
        info!(
            "已作答: {}/{}",
            session.questions.len()
                - answers.unanswered_count(session.question_ids()),
            session.questions.len()
        );
        info!("保存状态: {:?}", self.session.save_status());
        info!("切屏次数: {}", self.session.integrity().switch_count());
        info!("{}", "─".repeat(60));
    }

    /// 显示提示，返回是否应结束答题
    fn show_notice(&self, notice: &Notice) -> bool {
        match notice {
            Notice::TimeWarning { remaining } => {
                warn!("⏰ 距离考试结束还有 {}", format_remaining(*remaining))
            }
            Notice::VisibilityWarning { switches } => {
                warn!("⚠️ 检测到第 {} 次离开考试页面，该行为已被记录", switches)
            }
            Notice::InactivityWarning { idle_secs } => {
                warn!("⚠️ 已 {} 分钟无操作，继续无操作将自动交卷", idle_secs / 60)
            }
            Notice::ClipboardBlocked { action } => warn!("🚫 考试期间禁止{}", action),
            Notice::SaveFailed { message } => warn!("⚠️ 答案保存失败，稍后自动重试: {}", message),
            Notice::ClockFallback => warn!("⚠️ 无法同步服务器时间，使用本地时钟计时"),
            Notice::Submitted { trigger, receipt } => {
                info!("{}", "=".repeat(60));
                info!("✅ 已交卷 ({})", trigger);
                if let Some(score) = receipt.score {
                    info!("得分: {}", score);
                }
                if let Some(passed) = receipt.passed {
                    info!("结果: {}", if passed { "通过" } else { "未通过" });
                }
                info!("{}", "=".repeat(60));
                return true;
            }
            Notice::SubmitFailed { message } => {
                error!("❌ 交卷失败: {}，可以输入 submit 重试", message)
            }
        }
        false
    }
}

/// 一行输入对应的命令
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Answer {
        question_id: String,
        value: AnswerValue,
    },
    Save,
    Submit,
    Confirm,
    Visibility {
        hidden: bool,
    },
    Clipboard(ClipboardAction),
    Status,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match head {
            "answer" | "multi" => {
                let Some((question_id, raw)) = rest.split_once(char::is_whitespace) else {
                    return Command::Unknown(line.to_string());
                };
                let raw = raw.trim();
                let value = if head == "multi" {
                    AnswerValue::Choices(
                        raw.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect(),
                    )
                } else {
                    match raw {
                        "true" => AnswerValue::Flag(true),
                        "false" => AnswerValue::Flag(false),
                        text => AnswerValue::Text(text.to_string()),
                    }
                };
                Command::Answer {
                    question_id: question_id.to_string(),
                    value,
                }
            }
            "save" => Command::Save,
            "submit" => Command::Submit,
            "yes" | "y" => Command::Confirm,
            "hide" => Command::Visibility { hidden: true },
            "show" => Command::Visibility { hidden: false },
            "copy" => Command::Clipboard(ClipboardAction::Copy),
            "cut" => Command::Clipboard(ClipboardAction::Cut),
            "paste" => Command::Clipboard(ClipboardAction::Paste),
            "menu" => Command::Clipboard(ClipboardAction::ContextMenu),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 在线考试答题");
    info!("🌐 考试服务: {}", config.api_base_url);
    info!(
        "💾 自动保存: 停止输入 {}ms 后 / 每 {} 秒",
        config.debounce_ms, config.periodic_sync_secs
    );
    info!("{}", "=".repeat(60));
}

fn print_help() {
    info!("命令: answer <题号> <答案> | multi <题号> A,B | save | submit | status");
    info!("      hide | show | copy | cut | paste | menu | help | quit");
}
