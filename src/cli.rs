use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use reedline::{DefaultCompleter, DefaultHinter, DefaultPrompt, Reedline, Signal};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::api::ApiClient;
use crate::config::Config;
use crate::docs;
use crate::logging;
use crate::playground::{Conversation, Playground, SubmitError, Update, WsConnector};
use crate::settings::{FileStore, ProviderSettings, SettingsStore};
use crate::types::{AgentDraft, AgentRecord, RunRequest, ToolConfig, ToolKind};

/// AI Agent Workbench 终端客户端
#[derive(Parser, Debug)]
#[command(name = "awb", version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径（默认 ~/.awb/config.toml）
    #[arg(short, long, env = "AWB_CONFIG")]
    pub config: Option<PathBuf>,

    /// 覆盖配置中的后端地址
    #[arg(long)]
    pub url: Option<String>,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 管理 agent 定义
    #[command(subcommand)]
    Agents(AgentsCommand),
    /// 检查后端和模型服务连通性
    Health,
    /// 列出可用模型
    Models,
    /// 模型服务凭据
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// 查看内置文档
    Docs { topic: Option<String> },
    /// 后端保存的对话历史
    #[command(subcommand)]
    Conversations(ConversationsCommand),
    /// 后台运行一轮，输出 run id 和对话 id
    Run {
        agent_id: String,
        input: String,
        /// 接着已有对话继续
        #[arg(long)]
        conversation: Option<String>,
    },
    /// 查看一次运行的追踪信息
    Trace { run_id: String },
    /// 与 agent 对话
    #[command(alias = "c")]
    Chat {
        agent_id: String,
        /// 显示工具调用步骤
        #[arg(long)]
        steps: bool,
    },
    /// 初始化配置
    Onboard,
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommand {
    #[command(alias = "ls")]
    List,
    Show { id: String },
    Create(AgentArgs),
    Update {
        id: String,
        #[command(flatten)]
        args: AgentArgs,
    },
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Args, Debug, Default)]
pub struct AgentArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub instructions: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// 工具，格式 kind:name[:description]，可重复
    #[arg(long = "tool")]
    pub tools: Vec<String>,
    /// 从 JSON 文件读取完整定义，命令行参数会覆盖其中的字段
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        api_version: Option<String>,
        /// 模型到部署名的映射，格式 model=deployment，可重复
        #[arg(long = "deployment")]
        deployments: Vec<String>,
    },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConversationsCommand {
    #[command(alias = "ls")]
    List,
    Show { id: String },
    #[command(alias = "rm")]
    Delete { id: String },
}

/// 解析 `kind:name[:description]`
fn parse_tool_spec(spec: &str) -> Result<ToolConfig> {
    let mut parts = spec.splitn(3, ':');
    let kind: ToolKind = parts.next().unwrap_or_default().trim().parse()?;
    let name = parts
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("工具格式应为 kind:name[:description]：{}", spec))?;
    let description = parts.next().map(str::trim).unwrap_or_default();

    Ok(ToolConfig {
        name: name.to_string(),
        description: description.to_string(),
        kind,
        function_code: None,
        parameters: None,
    })
}

fn parse_deployment(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((model, deployment)) if !model.trim().is_empty() => {
            Ok((model.trim().to_string(), deployment.trim().to_string()))
        }
        _ => bail!("部署映射格式应为 model=deployment：{}", spec),
    }
}

impl AgentArgs {
    /// 在 `base` 上叠加文件和命令行参数。
    /// 工具沿用 `base` 时不要求函数工具带代码
    fn apply(&self, base: AgentDraft) -> Result<AgentDraft> {
        let tools_supplied = self.file.is_some() || !self.tools.is_empty();
        let mut draft = match &self.file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("读取 agent 定义失败：{}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("解析 agent 定义失败：{}", path.display()))?
            }
            None => base,
        };

        if let Some(name) = &self.name {
            draft.name = name.clone();
        }
        if let Some(instructions) = &self.instructions {
            draft.instructions = instructions.clone();
        }
        if let Some(model) = &self.model {
            draft.model = model.clone();
        }
        if !self.tools.is_empty() {
            draft.tools = self
                .tools
                .iter()
                .map(String::as_str)
                .map(parse_tool_spec)
                .collect::<Result<_>>()?;
        }

        if tools_supplied {
            draft.validate()?;
        } else {
            draft.validate_existing_tools()?;
        }
        Ok(draft)
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}

fn print_agent(agent: &AgentRecord) {
    println!("🤖 {} ({})", agent.name, agent.id);
    println!("   模型：{}", agent.model);
    println!(
        "   创建：{} | 更新：{}",
        agent.created_at.format("%Y-%m-%d %H:%M"),
        agent.updated_at.format("%Y-%m-%d %H:%M")
    );
    println!("   指令:");
    for line in agent.instructions.lines() {
        println!("     {}", line);
    }
    if agent.tools.is_empty() {
        println!("   工具：无");
    } else {
        println!("   工具:");
        for tool in &agent.tools {
            if tool.description.is_empty() {
                println!("     - {} [{}]", tool.name, tool.kind.as_str());
            } else {
                println!("     - {} [{}] {}", tool.name, tool.kind.as_str(), tool.description);
            }
        }
    }
}

async fn run_agents(api: &ApiClient, command: AgentsCommand) -> Result<()> {
    match command {
        AgentsCommand::List => {
            let mut agents = api.list_agents().await?;
            if agents.is_empty() {
                println!("📭 暂无 agent，运行 'awb agents create' 创建");
                return Ok(());
            }
            agents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            println!("📋 Agent 列表:");
            println!();
            for agent in &agents {
                println!("{} - {}", short_id(&agent.id), agent.name);
                println!(
                    "   模型：{} | 工具：{} | 更新：{}",
                    agent.model,
                    agent.tools.len(),
                    agent.updated_at.format("%Y-%m-%d %H:%M")
                );
                println!();
            }
        }
        AgentsCommand::Show { id } => {
            let agent = api.get_agent(&id).await?;
            print_agent(&agent);
        }
        AgentsCommand::Create(args) => {
            let draft = args.apply(AgentDraft::new("", ""))?;
            let created = api.create_agent(&draft.into_record(None)).await?;
            println!("✅ 已创建 agent：{} ({})", created.name, created.id);
        }
        AgentsCommand::Update { id, args } => {
            let existing = api.get_agent(&id).await?;
            let draft = args.apply(AgentDraft::from(&existing))?;
            let mut record = draft.into_record(Some(existing.id.clone()));
            record.created_at = existing.created_at;
            let updated = api.update_agent(&id, &record).await?;
            println!("✅ 已更新 agent：{} ({})", updated.name, updated.id);
        }
        AgentsCommand::Delete { id } => {
            api.delete_agent(&id).await?;
            println!("✅ 已删除 agent：{}", id);
        }
    }
    Ok(())
}

async fn run_health(api: &ApiClient, models_only: bool) -> Result<()> {
    let health = api
        .health()
        .await
        .context("无法连接后端，请检查 [backend] base_url")?;

    if !health.is_ok() {
        eprintln!("❌ 模型服务不可用:");
        for line in &health.models {
            eprintln!("   {}", line);
        }
        bail!("健康检查失败");
    }

    if !models_only {
        println!("✅ 后端连接正常");
    }
    if health.models.is_empty() {
        println!("（没有可用模型）");
    }
    for model in &health.models {
        println!("{}", model);
    }
    Ok(())
}

fn print_settings(settings: &ProviderSettings) {
    println!("🔑 API Key:     {}", settings.masked_api_key());
    let endpoint = if settings.endpoint.is_empty() {
        "(未设置)"
    } else {
        settings.endpoint.as_str()
    };
    println!("🌐 Endpoint:    {}", endpoint);
    println!("📅 API Version: {}", settings.api_version);
    if settings.deployments.is_empty() {
        println!("📦 部署映射：无");
    } else {
        println!("📦 部署映射:");
        for (model, deployment) in &settings.deployments {
            println!("   {} -> {}", model, deployment);
        }
    }
}

fn run_settings(config: &Config, command: SettingsCommand) -> Result<()> {
    let store = SettingsStore::new(FileStore::new(config.storage.store_file()));

    match command {
        SettingsCommand::Show => {
            let settings = store.load().context("读取设置失败")?;
            print_settings(&settings);
            if !settings.is_configured() {
                println!();
                println!("运行 'awb settings set --api-key <key> --endpoint <url>' 完成配置");
            }
        }
        SettingsCommand::Set {
            api_key,
            endpoint,
            api_version,
            deployments,
        } => {
            let mut settings = store.load().context("读取设置失败")?;
            if let Some(key) = api_key {
                settings.api_key = key;
            }
            if let Some(endpoint) = endpoint {
                settings.endpoint = endpoint.trim_end_matches('/').to_string();
            }
            if let Some(version) = api_version {
                settings.api_version = version;
            }
            for spec in &deployments {
                let (model, deployment) = parse_deployment(spec)?;
                if deployment.is_empty() {
                    settings.deployments.remove(&model);
                } else {
                    settings.deployments.insert(model, deployment);
                }
            }
            store.save(&settings).context("保存设置失败")?;
            println!("✅ 设置已保存");
            print_settings(&settings);
        }
        SettingsCommand::Clear => {
            store.clear().context("清除设置失败")?;
            println!("✅ 设置已清除");
        }
    }
    Ok(())
}

fn run_docs(topic: Option<String>) -> Result<()> {
    match topic {
        None => {
            println!("📚 文档主题:");
            for topic in docs::topics() {
                println!("  {:<12} {}", topic.name, topic.title);
            }
            println!();
            println!("运行 'awb docs <主题>' 查看内容");
        }
        Some(name) => {
            let topic = docs::find(&name)
                .ok_or_else(|| anyhow!("未知文档主题：{}，运行 'awb docs' 查看列表", name))?;
            println!("# {}", topic.title);
            println!();
            println!("{}", topic.body);
        }
    }
    Ok(())
}

async fn run_conversations(api: &ApiClient, command: ConversationsCommand) -> Result<()> {
    match command {
        ConversationsCommand::List => {
            let conversations = api.list_conversations().await?;
            if conversations.is_empty() {
                println!("📭 暂无对话");
                return Ok(());
            }
            let mut ids: Vec<&String> = conversations.keys().collect();
            ids.sort();

            println!("📋 对话列表:");
            println!();
            for id in ids {
                let messages = &conversations[id];
                let preview: String = messages
                    .iter()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.chars().take(40).collect())
                    .unwrap_or_default();
                println!("{} - {}", short_id(id), preview);
                println!("   消息数：{}", messages.len());
                println!();
            }
        }
        ConversationsCommand::Show { id } => {
            for message in api.get_conversation(&id).await? {
                let label = match message.role.as_str() {
                    "user" => "👤 你",
                    "assistant" => "🤖 AI",
                    _ => "⚠️ 系统",
                };
                println!("{}: {}\n", label, message.content);
            }
        }
        ConversationsCommand::Delete { id } => {
            api.delete_conversation(&id).await?;
            println!("✅ 已删除对话：{}", id);
        }
    }
    Ok(())
}

async fn run_once(
    api: &ApiClient,
    agent_id: String,
    input: String,
    conversation_id: Option<String>,
) -> Result<()> {
    let request = RunRequest {
        agent_id,
        input,
        conversation_id,
    };
    let response = api.run_agent(&request).await?;

    println!("🚀 已提交运行（状态：{}）", response.status);
    println!("   run id：{}", response.run_id);
    println!("   对话 id：{}", response.conversation_id);
    if let Some(output) = &response.final_output {
        println!();
        println!("🤖 AI: {}", output);
    }
    println!();
    println!("运行 'awb trace {}' 查看追踪信息", response.run_id);
    println!(
        "运行 'awb conversations show {}' 查看对话",
        response.conversation_id
    );
    Ok(())
}

async fn run_trace(api: &ApiClient, run_id: &str) -> Result<()> {
    let trace = api.get_trace(run_id).await?;
    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}

/// Onboard 命令 - 写入默认配置并创建数据目录
fn run_onboard(path: &Path) -> Result<()> {
    println!("🚀 初始化 awb 配置...\n");

    let config = if path.exists() {
        println!("ℹ️ 配置文件已存在，保留现有内容：{}", path.display());
        Config::load(path)?
    } else {
        let config = Config::default();
        config.save(path).context("保存配置文件失败")?;
        println!("✅ 保存配置：{}", path.display());
        config
    };

    config.ensure_storage().context("创建数据目录失败")?;
    println!("✅ 数据目录：{}", config.storage.data_dir.display());
    println!("🌐 后端地址：{}", config.backend.base_url);
    println!();
    println!("🎉 初始化完成！");
    println!();
    println!("你可以:");
    println!("  1. 运行 'awb health' 检查后端");
    println!("  2. 运行 'awb settings set' 配置模型服务凭据");
    println!("  3. 运行 'awb docs' 查看文档");
    Ok(())
}

fn print_chat_help() {
    println!("命令:");
    println!("  /new    - 开始新对话");
    println!("  /steps  - 查看执行步骤");
    println!("  /quit   - 退出");
    println!("生成过程中按 Ctrl-C 中断本轮");
    println!();
}

enum Pump {
    Update(Option<Update>),
    Interrupted,
}

/// 驱动一轮流式回复，边收边打印
async fn stream_reply(playground: &mut Playground<WsConnector>, show_steps: bool) {
    let mut stdout = std::io::stdout();
    let mut streamed = String::new();
    print!("🤖 AI: ");
    let _ = stdout.flush();

    loop {
        let pump = tokio::select! {
            update = playground.next_update() => Pump::Update(update),
            _ = tokio::signal::ctrl_c() => Pump::Interrupted,
        };
        let update = match pump {
            Pump::Update(Some(update)) => update,
            Pump::Update(None) => break,
            Pump::Interrupted => match playground.cancel() {
                Some(update) => update,
                None => break,
            },
        };

        match update {
            Update::Opened => debug!("stream opened"),
            Update::Delta(text) => {
                streamed.push_str(&text);
                print!("{}", text);
                let _ = stdout.flush();
            }
            Update::Step(step) => {
                if show_steps {
                    println!("\n   {}", step.summary());
                }
            }
            Update::Completed(turn) => {
                if streamed.trim() != turn.content.trim() {
                    if !streamed.is_empty() {
                        println!();
                    }
                    print!("{}", turn.content);
                }
                println!("\n");
                break;
            }
            Update::Failed(error) => {
                println!("\n❌ 错误：{}\n", error);
                break;
            }
            Update::Skipped(_) | Update::Ignored => {}
        }
    }
}

/// Chat 命令 - 交互式 playground
async fn run_chat(config: &Config, api: ApiClient, agent_id: &str, show_steps: bool) -> Result<()> {
    let agent = api
        .get_agent(agent_id)
        .await
        .with_context(|| format!("获取 agent 失败：{}", agent_id))?;

    println!("🤖 {}（模型：{}）", agent.name, agent.model);
    println!("输入 /help 查看命令，/quit 退出\n");

    let conversation = Conversation::new(agent.id.clone(), config.playground.step_retention);
    let mut playground = Playground::new(conversation, WsConnector::new(api));
    let show_steps = show_steps || config.playground.show_steps;

    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(DefaultHinter::default()))
        .with_completer(Box::new(DefaultCompleter::default()));
    let prompt = DefaultPrompt::default();

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();

                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    let cmd = input.split_whitespace().next().unwrap_or_default().to_lowercase();
                    match cmd.as_str() {
                        "/quit" | "/exit" => {
                            println!("👋 再见！");
                            break;
                        }
                        "/new" => match playground.reset() {
                            Ok(()) => println!("✅ 已开始新对话\n"),
                            Err(e) => println!("❌ {}\n", e),
                        },
                        "/steps" => {
                            let steps = playground.conversation().steps();
                            if steps.is_empty() {
                                println!("（暂无执行步骤）\n");
                            } else {
                                for (i, step) in steps.iter().enumerate() {
                                    println!("{:>3}. {}", i + 1, step.summary());
                                }
                                println!();
                            }
                        }
                        "/help" | "/h" => print_chat_help(),
                        _ => {
                            println!("❌ 未知命令：{}", input);
                            println!("输入 /help 查看帮助\n");
                        }
                    }
                    continue;
                }

                match playground.submit(input) {
                    Ok(()) => stream_reply(&mut playground, show_steps).await,
                    Err(SubmitError::Busy(text)) => {
                        println!("⏳ 上一轮回复尚未结束，未发送：{}\n", text);
                    }
                    Err(SubmitError::Empty) => {}
                }
            }
            Signal::CtrlD => {
                println!("\n👋 再见！");
                break;
            }
            Signal::CtrlC => {
                println!("\n输入 /quit 退出，或继续输入问题");
            }
        }
    }

    Ok(())
}

/// 主入口函数
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    if matches!(command, Command::Onboard) {
        return run_onboard(&config_path);
    }

    let mut config = Config::load(&config_path)?;
    if let Some(url) = cli.url {
        config.backend.base_url = url;
    }
    debug!(path = %config_path.display(), base_url = %config.backend.base_url, "config loaded");

    let api = || ApiClient::new(&config.backend);
    match command {
        Command::Agents(cmd) => run_agents(&api()?, cmd).await,
        Command::Health => run_health(&api()?, false).await,
        Command::Models => run_health(&api()?, true).await,
        Command::Settings(cmd) => run_settings(&config, cmd),
        Command::Docs { topic } => run_docs(topic),
        Command::Conversations(cmd) => run_conversations(&api()?, cmd).await,
        Command::Run {
            agent_id,
            input,
            conversation,
        } => run_once(&api()?, agent_id, input, conversation).await,
        Command::Trace { run_id } => run_trace(&api()?, &run_id).await,
        Command::Chat { agent_id, steps } => run_chat(&config, api()?, &agent_id, steps).await,
        Command::Onboard => run_onboard(&config_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_chat() {
        let cli = Cli::parse_from(["awb", "--url", "http://host:1", "chat", "a1", "--steps"]);
        assert_eq!(cli.url.as_deref(), Some("http://host:1"));
        match cli.command {
            Some(Command::Chat { agent_id, steps }) => {
                assert_eq!(agent_id, "a1");
                assert!(steps);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_agent_create() {
        let cli = Cli::parse_from([
            "awb",
            "agents",
            "create",
            "--name",
            "Bot",
            "--instructions",
            "hi",
            "--tool",
            "web_search:web",
            "--tool",
            "file_search:docs:Internal docs",
        ]);
        match cli.command {
            Some(Command::Agents(AgentsCommand::Create(args))) => {
                assert_eq!(args.name.as_deref(), Some("Bot"));
                assert_eq!(args.tools.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["awb", "run", "a1", "what now", "--conversation", "c1"]);
        match cli.command {
            Some(Command::Run {
                agent_id,
                input,
                conversation,
            }) => {
                assert_eq!(agent_id, "a1");
                assert_eq!(input, "what now");
                assert_eq!(conversation.as_deref(), Some("c1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_tool_spec() {
        let tool = parse_tool_spec("file_search:docs:Internal: handbook").unwrap();
        assert_eq!(tool.kind, ToolKind::FileSearch);
        assert_eq!(tool.name, "docs");
        assert_eq!(tool.description, "Internal: handbook");

        assert!(parse_tool_spec("web_search").is_err());
        assert!(parse_tool_spec("shell:ls").is_err());
    }

    #[test]
    fn test_parse_deployment() {
        assert_eq!(
            parse_deployment("gpt-4.1=prod").unwrap(),
            ("gpt-4.1".to_string(), "prod".to_string())
        );
        assert!(parse_deployment("=prod").is_err());
        assert!(parse_deployment("gpt-4.1").is_err());
    }

    #[test]
    fn test_agent_args_override_and_validate() {
        let args = AgentArgs {
            instructions: Some("new instructions".to_string()),
            ..Default::default()
        };
        let base = AgentDraft::new("Bot", "old");
        let draft = args.apply(base).unwrap();
        assert_eq!(draft.name, "Bot");
        assert_eq!(draft.instructions, "new instructions");

        let empty = AgentArgs::default();
        assert!(empty.apply(AgentDraft::new("", "")).is_err());
    }

    #[test]
    fn test_update_keeps_stored_function_tool_without_code() {
        let mut base = AgentDraft::new("Bot", "old");
        base.tools.push(ToolConfig {
            name: "lookup".to_string(),
            description: String::new(),
            kind: ToolKind::Function,
            function_code: None,
            parameters: None,
        });

        let rename = AgentArgs {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let draft = rename.apply(base.clone()).unwrap();
        assert_eq!(draft.name, "Renamed");
        assert_eq!(draft.tools.len(), 1);

        // 用户新给的函数工具仍然要有代码
        let retool = AgentArgs {
            tools: vec!["function:lookup".to_string()],
            ..Default::default()
        };
        assert!(retool.apply(base).is_err());
    }

    #[test]
    fn test_agent_args_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{"name":"Coder","instructions":"write code","tools":[
                {"name":"run","type":"function","function_code":"def run(): pass"}]}"#,
        )
        .unwrap();

        let args = AgentArgs {
            file: Some(path),
            model: Some("gpt-4o".to_string()),
            ..Default::default()
        };
        let draft = args.apply(AgentDraft::new("ignored", "ignored")).unwrap();
        assert_eq!(draft.name, "Coder");
        assert_eq!(draft.model, "gpt-4o");
        assert_eq!(draft.tools[0].kind, ToolKind::Function);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
