use once_cell::sync::Lazy;

/// 一篇内置文档
#[derive(Debug)]
pub struct DocTopic {
    pub name: &'static str,
    pub title: &'static str,
    pub body: &'static str,
}

pub fn topics() -> &'static [DocTopic] {
    &TOPICS
}

/// 按名字查找，忽略大小写，也接受唯一前缀
pub fn find(name: &str) -> Option<&'static DocTopic> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    if let Some(topic) = TOPICS.iter().find(|t| t.name == name) {
        return Some(topic);
    }
    let mut matches = TOPICS.iter().filter(|t| t.name.starts_with(&name));
    match (matches.next(), matches.next()) {
        (Some(topic), None) => Some(topic),
        _ => None,
    }
}

static TOPICS: Lazy<Vec<DocTopic>> = Lazy::new(|| {
    vec![
        DocTopic {
            name: "overview",
            title: "工作台概览",
            body: "\
awb 是 AI Agent Workbench 的终端客户端。
agent 定义保存在后端，本地只保存连接配置和模型服务凭据。

常用流程:
  1. awb onboard                 生成 ~/.awb/config.toml
  2. awb health                  检查后端和模型服务是否可用
  3. awb agents create ...       创建 agent
  4. awb chat <agent_id>         在 playground 中对话

不需要实时输出时可以后台运行:
  awb run <agent_id> \"问题\"      输出 run id 和对话 id
  awb trace <run_id>             查看运行追踪
  awb conversations show <id>    查看对话内容",
        },
        DocTopic {
            name: "agents",
            title: "Agent 定义",
            body: "\
每个 agent 包含名称、指令、模型和工具列表。

  awb agents list
  awb agents show <id>
  awb agents create --name 天气助手 --instructions \"回答天气问题\" --model gpt-4.1
  awb agents create --file agent.json
  awb agents update <id> --instructions \"新的指令\"
  awb agents delete <id>

名称、指令、模型不能为空；提交前在本地校验。",
        },
        DocTopic {
            name: "tools",
            title: "工具",
            body: "\
工具类型:
  function      后端执行的函数，需要 function_code，名称必须是合法标识符
  web_search    网络搜索
  file_search   文件检索，参数写在 parameters 里

命令行添加工具: --tool web_search:web --tool file_search:docs
函数工具请用 --file 提交完整 JSON。",
        },
        DocTopic {
            name: "playground",
            title: "Playground 对话",
            body: "\
awb chat <agent_id> 进入交互模式，每轮对话打开一条流式连接。
回复生成过程中实时显示增量文本，结束时以后端给出的最终内容为准。
工具调用和结果记录在执行步骤日志里。

交互命令:
  /new    开始新对话
  /steps  查看执行步骤
  /help   帮助
  /quit   退出

生成过程中按 Ctrl-C 中断本轮。",
        },
        DocTopic {
            name: "settings",
            title: "模型服务设置",
            body: "\
凭据保存在本地存储中（默认 ~/.awb/data/storage.json）。

  awb settings show
  awb settings set --api-key <key> --endpoint <url> --api-version 2025-03-01-preview
  awb settings set --deployment gpt-4.1=my-deployment
  awb settings clear

后端地址和 API key 在 ~/.awb/config.toml 的 [backend] 中配置，
也可以用 AWB_URL / AWB_API_KEY 环境变量覆盖默认值。",
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_exact_and_prefix() {
        assert_eq!(find("agents").map(|t| t.name), Some("agents"));
        assert_eq!(find("PLAY").map(|t| t.name), Some("playground"));
        assert_eq!(find("se").map(|t| t.name), Some("settings"));
    }

    #[test]
    fn test_find_rejects_unknown_and_empty() {
        assert!(find("nothing").is_none());
        assert!(find("  ").is_none());
    }

    #[test]
    fn test_topic_names_unique() {
        let mut names: Vec<&str> = topics().iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), topics().len());
    }
}
