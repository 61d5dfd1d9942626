//! Tool recommendation engine.
//!
//! Classifies a step's text into tool categories using static bilingual
//! keyword tables. Each category is scored independently: a category appears
//! in the output iff the role is eligible and at least one of its keywords
//! occurs (as a substring) in the case-folded `title + " " + description`.
//! There is no ranking or normalization across categories.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::AgentRole;

/// A named cluster of related tool capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Memory,
    Search,
    Analysis,
    Filesystem,
    Database,
    WebApi,
    Citation,
    Temporal,
}

/// Static importance of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Per-category result for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    /// Number of distinct keywords found; always at least 1.
    pub match_score: usize,
    pub matched_keywords: BTreeSet<String>,
}

/// Category → recommendation for one step. Produced fresh per step.
pub type Recommendations = BTreeMap<Category, Recommendation>;

struct CategoryRule {
    category: Category,
    priority: Priority,
    roles: &'static [AgentRole],
    keywords: &'static [&'static str],
}

const BOTH: &[AgentRole] = &[AgentRole::Researcher, AgentRole::Coder];
const RESEARCHER: &[AgentRole] = &[AgentRole::Researcher];
const CODER: &[AgentRole] = &[AgentRole::Coder];

const RULES: &[CategoryRule] = &[
    CategoryRule {
        category: Category::Memory,
        priority: Priority::High,
        roles: BOTH,
        keywords: &[
            "store", "remember", "track", "save", "history", "previous", "findings", "knowledge",
            "memory", "record", "archive", "preserve", "maintain", "keep",
            "存储", "保存", "记录", "追踪", "跟踪", "历史", "之前", "发现", "知识", "记忆",
            "存档", "维护", "保持", "储存", "建立", "创建", "图谱", "实体", "关系",
        ],
    },
    CategoryRule {
        category: Category::Search,
        priority: Priority::High,
        roles: RESEARCHER,
        keywords: &[
            "search", "find", "discover", "explore", "investigate", "research", "academic",
            "papers", "retrieve", "lookup", "query", "browse",
            "搜索", "查找", "发现", "探索", "调查", "研究", "学术", "论文", "检索", "查询",
            "浏览", "寻找", "获取", "收集",
        ],
    },
    CategoryRule {
        category: Category::Analysis,
        priority: Priority::Medium,
        roles: BOTH,
        keywords: &[
            "analyze", "process", "calculate", "statistics", "data", "metrics", "trends",
            "patterns", "computation", "algorithm", "model", "evaluation",
            "分析", "处理", "计算", "统计", "数据", "指标", "趋势", "模式", "算法", "模型",
            "评估", "解析",
        ],
    },
    CategoryRule {
        category: Category::Filesystem,
        priority: Priority::Medium,
        roles: BOTH,
        keywords: &[
            "file", "document", "read", "write", "csv", "json", "pdf", "text", "local",
            "folder", "directory", "path", "upload", "download",
            "文件", "文档", "读取", "写入", "本地", "目录", "路径", "上传", "下载", "文本",
            "资料", "材料",
        ],
    },
    CategoryRule {
        category: Category::Database,
        priority: Priority::Medium,
        roles: CODER,
        keywords: &[
            "database", "sql", "query", "table", "records", "store", "retrieve", "insert",
            "update", "delete", "select",
            "数据库", "查询", "表格", "记录", "插入", "更新", "删除", "选择",
        ],
    },
    CategoryRule {
        category: Category::WebApi,
        priority: Priority::Low,
        roles: BOTH,
        keywords: &[
            "api", "web", "http", "rest", "service", "integration", "external", "endpoint",
            "request", "response",
            "接口", "网络", "服务", "集成", "外部", "请求", "响应", "调用",
        ],
    },
    CategoryRule {
        category: Category::Citation,
        priority: Priority::Medium,
        roles: RESEARCHER,
        keywords: &[
            "citation", "reference", "bibliography", "source", "academic", "paper", "cite",
            "footnote",
            "引用", "参考", "文献", "来源", "学术", "论文", "引文", "脚注", "参考文献",
        ],
    },
    CategoryRule {
        category: Category::Temporal,
        priority: Priority::Low,
        roles: RESEARCHER,
        keywords: &[
            "time", "date", "schedule", "timeline", "recent", "latest", "current", "when",
            "period", "duration",
            "时间", "日期", "时间表", "时间线", "最近", "最新", "当前", "何时", "期间", "持续",
        ],
    },
];

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Memory,
        Category::Search,
        Category::Analysis,
        Category::Filesystem,
        Category::Database,
        Category::WebApi,
        Category::Citation,
        Category::Temporal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Memory => "memory",
            Category::Search => "search",
            Category::Analysis => "analysis",
            Category::Filesystem => "filesystem",
            Category::Database => "database",
            Category::WebApi => "web_api",
            Category::Citation => "citation",
            Category::Temporal => "temporal",
        }
    }

    /// Tool-name fragments that mark a tool as belonging to this category.
    ///
    /// Categories without a family never make a server relevant.
    pub fn name_tokens(&self) -> &'static [&'static str] {
        match self {
            Category::Memory => &[
                "memory", "entities", "relations", "observations", "store", "save", "create", "add",
            ],
            Category::Search => &["search", "find", "query", "retrieve", "browse", "papers", "paper"],
            Category::Filesystem => &["file", "read", "write", "directory", "path"],
            Category::Analysis => &["analyze", "process", "calculate", "data", "statistics"],
            Category::Citation => &["citation", "reference", "bibliography", "cite"],
            Category::Database | Category::WebApi | Category::Temporal => &[],
        }
    }

    /// Whether a tool name lexically belongs to this category.
    pub fn matches_tool_name(&self, tool_name: &str) -> bool {
        let lower = tool_name.to_lowercase();
        self.name_tokens().iter().any(|t| lower.contains(t))
    }

    /// Fragments used to decide whether a tool gets this category's usage hint.
    fn hint_tokens(&self) -> &'static [&'static str] {
        match self {
            Category::Memory => &["memory", "store", "save"],
            Category::Search => &["search", "web", "brave"],
            Category::Filesystem => &["file", "read", "write"],
            Category::Analysis => &["analyze", "process", "data"],
            Category::Citation => &["citation", "reference", "bib"],
            Category::Database | Category::WebApi | Category::Temporal => &[],
        }
    }

    fn hint_text(&self, step_title: &str) -> Option<String> {
        let text = match self {
            Category::Memory => format!(
                "Store key findings about '{step_title}' for later reference and cross-step analysis."
            ),
            Category::Search => format!("Use for comprehensive research on '{step_title}' topics."),
            Category::Filesystem => {
                format!("Access local files or documents related to '{step_title}'.")
            }
            Category::Analysis => format!("Process and analyze data for '{step_title}' insights."),
            Category::Citation => {
                format!("Manage references and citations for '{step_title}' research.")
            }
            Category::Database | Category::WebApi | Category::Temporal => return None,
        };
        Some(text)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommend tool categories for a step.
pub fn recommend(step_title: &str, step_description: &str, role: AgentRole) -> Recommendations {
    let content = format!("{step_title} {step_description}").to_lowercase();
    let mut out = Recommendations::new();

    for rule in RULES {
        if !rule.roles.contains(&role) {
            continue;
        }
        let matched: BTreeSet<String> = rule
            .keywords
            .iter()
            .filter(|kw| content.contains(*kw))
            .map(|kw| kw.to_string())
            .collect();
        if !matched.is_empty() {
            out.insert(
                rule.category,
                Recommendation {
                    priority: rule.priority,
                    match_score: matched.len(),
                    matched_keywords: matched,
                },
            );
        }
    }
    out
}

/// Step-specific usage hint for a tool, if one of the recommended categories
/// claims it. Categories are checked in a fixed order and the first match wins.
pub fn usage_hint(tool_name: &str, step_title: &str, recs: &Recommendations) -> Option<String> {
    const HINT_ORDER: [Category; 5] = [
        Category::Memory,
        Category::Search,
        Category::Filesystem,
        Category::Analysis,
        Category::Citation,
    ];
    let lower = tool_name.to_lowercase();
    HINT_ORDER
        .iter()
        .find(|c| recs.contains_key(c) && c.hint_tokens().iter().any(|t| lower.contains(t)))
        .and_then(|c| c.hint_text(step_title))
        .map(|hint| format!("RECOMMENDED for this step: {hint}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knowledge_graph_step_recommends_memory_not_database() {
        let recs = recommend(
            "数据存储和知识图谱构建",
            "存储研究发现，建立实体关系，创建知识图谱",
            AgentRole::Researcher,
        );
        let memory = recs.get(&Category::Memory).unwrap();
        assert!(memory.match_score >= 1);
        assert_eq!(memory.priority, Priority::High);
        assert!(memory.matched_keywords.contains("图谱"));
        assert!(!recs.contains_key(&Category::Database));
    }

    #[test]
    fn test_role_eligibility() {
        let recs = recommend("Query the sales database", "select rows from a table", AgentRole::Researcher);
        assert!(!recs.contains_key(&Category::Database));

        let recs = recommend("Query the sales database", "select rows from a table", AgentRole::Coder);
        let db = recs.get(&Category::Database).unwrap();
        assert!(db.matched_keywords.contains("database"));
        assert!(db.matched_keywords.contains("select"));
        assert!(!recs.contains_key(&Category::Search));
    }

    #[test]
    fn test_reporter_has_no_eligible_categories() {
        let recs = recommend("Search papers", "analyze data and store findings", AgentRole::Reporter);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_case_folding() {
        let recs = recommend("SEARCH", "", AgentRole::Researcher);
        assert!(recs.contains_key(&Category::Search));
    }

    #[test]
    fn test_no_match_yields_empty() {
        let recs = recommend("Hello", "world", AgentRole::Researcher);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_score_counts_distinct_keywords() {
        let recs = recommend("search and find", "search again", AgentRole::Researcher);
        let search = &recs[&Category::Search];
        assert_eq!(search.match_score, 2);
        assert_eq!(search.match_score, search.matched_keywords.len());
    }

    #[test]
    fn test_name_tokens() {
        assert!(Category::Memory.matches_tool_name("create_entities"));
        assert!(Category::Search.matches_tool_name("search_papers"));
        assert!(!Category::Search.matches_tool_name("create_entities"));
        assert!(!Category::Temporal.matches_tool_name("get_time"));
    }

    #[test]
    fn test_usage_hint() {
        let recs = recommend("Store findings", "", AgentRole::Researcher);
        let hint = usage_hint("memory_store", "Store findings", &recs).unwrap();
        assert!(hint.starts_with("RECOMMENDED for this step:"));
        assert!(hint.contains("'Store findings'"));

        assert!(usage_hint("get_weather", "Store findings", &recs).is_none());
    }

    #[test]
    fn test_usage_hint_first_category_wins() {
        let mut recs = recommend("store", "", AgentRole::Researcher);
        recs.extend(recommend("search", "", AgentRole::Researcher));
        let hint = usage_hint("save_search", "t", &recs).unwrap();
        assert!(hint.contains("Store key findings"));
    }

    #[test]
    fn test_score_counts_each_keyword_once() {
        let recs = recommend("计算并处理数据, calculate again", "计算 处理", AgentRole::Coder);
        let analysis = recs.get(&Category::Analysis).unwrap();
        let expected: BTreeSet<String> =
            ["calculate", "处理", "数据", "计算"].iter().map(|s| s.to_string()).collect();
        assert_eq!(analysis.matched_keywords, expected);
        assert_eq!(analysis.match_score, 4);
    }
}
