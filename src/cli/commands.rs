use clap::{Args, Parser, Subcommand, ValueEnum};
use contentforge::generation::{ContentKind, TargetIdentity};
use std::path::PathBuf;

/// `contentforge` - idempotent content generation with provider cascade.
#[derive(Parser, Debug)]
#[command(name = "contentforge")]
#[command(version = "0.1.0")]
#[command(
    about = "Generate text and images through an ordered provider cascade.",
    long_about = None
)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Text,
    Image,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => Self::Text,
            KindArg::Image => Self::Image,
        }
    }
}

/// Names the artifact a command works on.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Content kind
    #[arg(long, value_enum, default_value = "text")]
    pub kind: KindArg,

    /// Subject id (e.g. a module or lesson id)
    #[arg(long)]
    pub subject: String,

    /// Locale (e.g. en, es-MX)
    #[arg(long, default_value = "en")]
    pub locale: String,

    /// Content variant or style
    #[arg(long, default_value = "default")]
    pub variant: String,

    /// Optional slot within the variant
    #[arg(long)]
    pub slot: Option<String>,
}

impl TargetArgs {
    pub fn identity(&self) -> TargetIdentity {
        let target = TargetIdentity::new(&self.subject, &self.locale, &self.variant);
        match &self.slot {
            Some(slot) => target.with_slot(slot),
            None => target,
        }
    }
}

fn parse_model_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
            Ok((provider.trim().to_string(), model.trim().to_string()))
        }
        _ => Err(format!("expected PROVIDER=MODEL, got `{raw}`")),
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate (or reuse) the canonical artifact for a target
    Generate {
        #[command(flatten)]
        target: TargetArgs,

        /// Prompt or source content
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Provider order override (comma-separated)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,

        /// Model override for one provider, as PROVIDER=MODEL (repeatable)
        #[arg(
            long = "model",
            value_name = "PROVIDER=MODEL",
            value_parser = parse_model_override
        )]
        models: Vec<(String, String)>,

        /// Display title (also used by fallback artifacts)
        #[arg(long)]
        title: Option<String>,

        /// Category hint for image fallbacks
        #[arg(long)]
        category: Option<String>,

        /// Ignore any stored artifact and regenerate
        #[arg(long)]
        force: bool,
    },

    /// Print the canonical stored artifact as JSON
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List configured provider order and credential presence
    Providers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_with_provider_list() {
        let cli = Cli::try_parse_from([
            "contentforge",
            "generate",
            "--subject",
            "M1",
            "--variant",
            "textbook",
            "--prompt",
            "Explain osmosis",
            "--providers",
            "openai,gemini",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Generate {
            target, providers, ..
        } = cli.command
        else {
            panic!("expected generate");
        };
        assert_eq!(providers, vec!["openai", "gemini"]);
        assert_eq!(target.identity(), TargetIdentity::new("M1", "en", "textbook"));
        assert_eq!(ContentKind::from(target.kind), ContentKind::Text);
    }

    #[test]
    fn model_overrides_name_their_provider() {
        let cli = Cli::try_parse_from([
            "contentforge",
            "generate",
            "--subject",
            "M1",
            "--prompt",
            "x",
            "--model",
            "openai=gpt-4o",
            "--model",
            "anthropic = claude-sonnet-4",
        ])
        .unwrap();
        let Commands::Generate { models, .. } = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(
            models,
            vec![
                ("openai".to_string(), "gpt-4o".to_string()),
                ("anthropic".to_string(), "claude-sonnet-4".to_string()),
            ]
        );

        let err = Cli::try_parse_from([
            "contentforge", "generate", "--subject", "M1", "--prompt", "x", "--model", "gpt-4o",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn prompt_and_prompt_file_conflict() {
        let err = Cli::try_parse_from([
            "contentforge",
            "generate",
            "--subject",
            "M1",
            "--prompt",
            "x",
            "--prompt-file",
            "p.md",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn show_accepts_image_kind_and_slot() {
        let cli = Cli::try_parse_from([
            "contentforge",
            "show",
            "--kind",
            "image",
            "--subject",
            "M2",
            "--slot",
            "hero",
        ])
        .unwrap();
        let Commands::Show { target } = cli.command else {
            panic!("expected show");
        };
        assert_eq!(target.kind, KindArg::Image);
        assert_eq!(target.identity().slot.as_deref(), Some("hero"));
    }
}
