use tera::{Context, Tera};

use super::completion::{AiError, CompletionClient, Message, ModelKind};
use crate::data::model::Comment;
use crate::sandbox::Execution;

macro_rules! prompt {
    ($name:literal) => {
        (
            concat!($name, ".txt"),
            include_str!(concat!("../../templates/prompts/", $name, ".txt")),
        )
    };
}

const PROMPTS: [(&str, &str); 18] = [
    prompt!("analyze_sql.system"),
    prompt!("analyze_sql.user"),
    prompt!("evaluate_code.system"),
    prompt!("evaluate_code.user"),
    prompt!("reply.system"),
    prompt!("reply.user"),
    prompt!("summary.system"),
    prompt!("summary.user"),
    prompt!("answer.system"),
    prompt!("answer.user"),
    prompt!("exercise.system"),
    prompt!("exercise.user"),
    prompt!("correct_sql.system"),
    prompt!("correct_sql.user"),
    prompt!("exercise_feedback.system"),
    prompt!("exercise_feedback.user"),
    prompt!("hint.system"),
    prompt!("hint.user"),
];

/// The platform's AI tasks: prompt rendering plus a completion call each.
pub struct Assistant {
    client: CompletionClient,
    tera: Tera,
}

impl Assistant {
    pub fn new(client: CompletionClient) -> Result<Self, AiError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(PROMPTS)?;
        Ok(Assistant { client, tera })
    }

    fn messages(&self, task: &str, context: &Context) -> Result<Vec<Message>, AiError> {
        Ok(vec![
            Message::system(self.tera.render(&format!("{}.system.txt", task), context)?),
            Message::user(self.tera.render(&format!("{}.user.txt", task), context)?),
        ])
    }

    async fn run(
        &self,
        task: &str,
        context: Context,
        max_tokens: u32,
        kind: ModelKind,
    ) -> Result<String, AiError> {
        let messages = self.messages(task, &context)?;
        self.client.complete(&messages, max_tokens, kind).await
    }

    pub async fn analyze_sql(&self, sql: &str) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("sql", sql);
        self.run("analyze_sql", context, 2000, ModelKind::Coder).await
    }

    pub async fn evaluate_comment_code(&self, content: &str, code: &str) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("content", content);
        context.insert("code", code);
        self.run("evaluate_code", context, 2000, ModelKind::Coder).await
    }

    /// Replies to a comment, quoting its parent when there is one.
    pub async fn generate_reply(&self, content: &str, parent: Option<&str>) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("content", content);
        context.insert("parent", &parent);
        self.run("reply", context, 1000, ModelKind::Chat).await
    }

    pub async fn summarize_mistakes(&self, comments: &[Comment]) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("comments", comments);
        self.run("summary", context, 2500, ModelKind::Chat).await
    }

    pub async fn answer_question(&self, question: &str) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("question", question);
        self.run("answer", context, 2000, ModelKind::Chat).await
    }

    pub async fn generate_exercise(&self, topic: &str, difficulty: &str) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("topic", topic);
        context.insert("difficulty", difficulty);
        self.run("exercise", context, 2000, ModelKind::Chat).await
    }

    pub async fn correct_sql(&self, sql: &str, error: Option<&str>) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("sql", sql);
        context.insert("error", &error);
        self.run("correct_sql", context, 2000, ModelKind::Coder).await
    }

    /// Guidance for a wrong exercise answer. The reference query is never part of the
    /// prompt.
    pub async fn analyze_exercise_answer(
        &self,
        description: &str,
        hint: Option<&str>,
        sql: &str,
        outcome: &Execution,
    ) -> Result<String, AiError> {
        let outcome = if outcome.success {
            serde_json::to_string_pretty(&outcome.result.json_rows()).unwrap_or_default()
        } else {
            format!(
                "execution error: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            )
        };

        let mut context = Context::new();
        context.insert("description", description);
        context.insert("hint", hint.unwrap_or("none"));
        context.insert("sql", sql);
        context.insert("outcome", &outcome);
        self.run("exercise_feedback", context, 1500, ModelKind::Coder).await
    }

    pub async fn generate_exercise_hint(
        &self,
        description: &str,
        hint: Option<&str>,
        sql: Option<&str>,
    ) -> Result<String, AiError> {
        let mut context = Context::new();
        context.insert("description", description);
        context.insert("hint", hint.unwrap_or("none"));
        context.insert("sql", &sql.filter(|s| !s.trim().is_empty()));
        self.run("hint", context, 800, ModelKind::Chat).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::ai::completion::tests::echo_server;
    use crate::sandbox::ResultSet;

    fn comment(content: &str, code: Option<&str>) -> Comment {
        let now = Utc::now();
        Comment {
            id: 1,
            uuid: "c".to_string(),
            user_id: Some(1),
            parent_id: None,
            content: content.to_string(),
            code_snippet: code.map(str::to_string),
            likes_count: 0,
            is_ai_reply: false,
            is_edited: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_templates_compile() {
        let client = CompletionClient::new(&crate::config::AiConfig {
            api_key: "k".to_string(),
            api_url: "http://127.0.0.1:1".to_string(),
            coder_model: "c".to_string(),
            chat_model: "m".to_string(),
            timeout: std::time::Duration::from_secs(1),
        })
        .unwrap();
        let assistant = Assistant::new(client).unwrap();

        let mut context = Context::new();
        context.insert("difficulty", "advanced");
        context.insert("topic", "joins");
        let messages = assistant.messages("exercise", &context).unwrap();
        assert!(messages[0].content.contains("advanced level"));
        assert_eq!(messages[1].role, "user");
    }

    #[tokio::test]
    async fn test_reply_quotes_parent() {
        let (client, captured) = echo_server();
        let assistant = Assistant::new(client).unwrap();

        let reply = assistant
            .generate_reply("Thanks!", Some("Why does my JOIN duplicate rows?"))
            .await
            .unwrap();
        assert!(reply.contains("Original comment: Why does my JOIN duplicate rows?"));
        assert!(reply.contains("Reply to: Thanks!"));

        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "chat-model");
        assert_eq!(body["max_tokens"], 1000);

        let reply = assistant.generate_reply("Hello", None).await.unwrap();
        assert_eq!(reply.trim(), "Hello");
    }

    #[tokio::test]
    async fn test_correct_sql_includes_error_only_when_given() {
        let (client, captured) = echo_server();
        let assistant = Assistant::new(client).unwrap();

        let text = assistant
            .correct_sql("SELEC * FROM t", Some("syntax error at or near \"SELEC\""))
            .await
            .unwrap();
        assert!(text.contains("SELEC * FROM t"));
        assert!(text.contains("Error message: syntax error"));
        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "coder-model");

        let text = assistant.correct_sql("SELEC 1", None).await.unwrap();
        assert!(!text.contains("Error message"));
    }

    #[tokio::test]
    async fn test_summary_lists_comments() {
        let (client, _) = echo_server();
        let assistant = Assistant::new(client).unwrap();

        let text = assistant
            .summarize_mistakes(&[
                comment("GROUP BY confuses me", Some("SELECT a, COUNT(*) FROM t")),
                comment("What is a NULL?", None),
            ])
            .await
            .unwrap();
        assert!(text.contains("1. GROUP BY confuses me"));
        assert!(text.contains("Code: SELECT a, COUNT(*) FROM t"));
        assert!(text.contains("2. What is a NULL?"));
    }

    #[tokio::test]
    async fn test_exercise_feedback_reports_execution_error() {
        let (client, captured) = echo_server();
        let assistant = Assistant::new(client).unwrap();

        let outcome = Execution {
            success: false,
            error: Some("column \"gade\" does not exist".to_string()),
            result: ResultSet::default(),
        };
        let text = assistant
            .analyze_exercise_answer("List failing students", None, "SELECT gade FROM practice_sc", &outcome)
            .await
            .unwrap();
        assert!(text.contains("execution error: column \"gade\" does not exist"));
        assert!(text.contains("**Hint**: none"));

        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["max_tokens"], 1500);
    }

    #[tokio::test]
    async fn test_hint_skips_blank_attempt() {
        let (client, _) = echo_server();
        let assistant = Assistant::new(client).unwrap();

        let text = assistant
            .generate_exercise_hint("Average grade", Some("Use AVG()"), Some("   "))
            .await
            .unwrap();
        assert!(text.contains("**Existing hint**: Use AVG()"));
        assert!(!text.contains("current attempt"));
    }
}
