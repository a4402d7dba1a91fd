use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "gemmis")]
#[command(about = "Terminal chat client for a local Ollama model, with tools", long_about = None)]
pub struct Args {
    #[arg(short = 'n', long = "new", help = "Start a new session instead of resuming the latest")]
    pub new_session: bool,

    #[arg(short = 'r', long = "resume", help = "Resume the session with this id")]
    pub resume: Option<String>,

    #[arg(long = "list-sessions", help = "List stored sessions and exit")]
    pub list_sessions: bool,

    #[arg(long = "delete-session", help = "Delete the session with this id and exit")]
    pub delete_session: Option<String>,

    #[arg(short = 'm', long = "model", help = "Model name (e.g. gemma3:4b)")]
    pub model: Option<String>,

    #[arg(
        long = "base-url",
        help = "Backend base URL (e.g. http://localhost:11434)"
    )]
    pub base_url: Option<String>,

    #[arg(long = "no-tools", help = "Do not offer tools to the model")]
    pub no_tools: bool,

    #[arg(
        short = 'y',
        long = "yes",
        help = "Approve sensitive tool calls without asking"
    )]
    pub yes: bool,

    #[arg(long = "max-tool-rounds", help = "Tool rounds allowed per turn")]
    pub max_tool_rounds: Option<usize>,

    #[arg(short = 'v', long = "verbose", help = "Log requests, tool runs and state changes")]
    pub verbose: bool,

    #[arg(help = "Send a single prompt and exit")]
    pub prompt: Vec<String>,
}

impl Args {
    pub fn one_shot_prompt(&self) -> Option<String> {
        if self.prompt.is_empty() {
            None
        } else {
            Some(self.prompt.join(" "))
        }
    }
}
