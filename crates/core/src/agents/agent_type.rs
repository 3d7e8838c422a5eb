//! Agent tool identification and per-tool sandbox requirements.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    Claude,
    Codex,
    Gemini,
    Mock,
}

impl AgentType {
    /// Infer the agent type from a configured tool name.
    ///
    /// Any tool starting with `mock` maps to [`AgentType::Mock`], which lets
    /// tests and dry runs exercise the full pipeline without a real CLI.
    ///
    /// # Examples
    ///
    /// ```
    /// use tf_core::agents::AgentType;
    ///
    /// assert_eq!(AgentType::from_tool_name("claude"), Some(AgentType::Claude));
    /// assert_eq!(AgentType::from_tool_name("mock-fail"), Some(AgentType::Mock));
    /// assert_eq!(AgentType::from_tool_name("unknown"), None);
    /// ```
    pub fn from_tool_name(tool: &str) -> Option<Self> {
        let tool = tool.trim().to_lowercase();
        match tool.as_str() {
            "claude" | "claude-code" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "gemini" | "gemini-cli" => Some(Self::Gemini),
            t if t.starts_with("mock") => Some(Self::Mock),
            _ => None,
        }
    }

    /// Get a human-readable name for the agent type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini",
            Self::Mock => "Mock",
        }
    }

    /// Executable the tool is launched with.
    pub fn binary(self) -> Option<&'static str> {
        match self {
            Self::Claude => Some("claude"),
            Self::Codex => Some("codex"),
            Self::Gemini => Some("gemini"),
            Self::Mock => None,
        }
    }

    /// Credential files, relative to the home directory, that the tool
    /// needs inside the sandbox.
    pub fn credential_files(self) -> &'static [&'static str] {
        match self {
            Self::Claude => &[".claude.json", ".claude/.credentials.json"],
            Self::Codex => &[".codex/auth.json"],
            Self::Gemini => &[".gemini/oauth_creds.json"],
            Self::Mock => &[],
        }
    }

    /// Host environment variables passed through to the sandbox when set.
    pub fn api_key_vars(self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"],
            Self::Codex => &["OPENAI_API_KEY"],
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Self::Mock => &[],
        }
    }
}
