use super::*;

fn parse_args(argv: &[&str]) -> Args {
    Args::try_parse_from(argv)
        .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
}

#[test]
fn bare_invocation_defaults_to_chat() {
    let args = parse_args(&["causerie"]);
    assert!(args.command.is_none());
    assert!(args.log.is_none());
    assert!(args.base_url.is_none());
}

#[test]
fn global_flags_parse_before_and_after_the_subcommand() {
    let args = parse_args(&["causerie", "--log", "chat.log", "chat"]);
    assert_eq!(args.log.as_deref(), Some("chat.log"));
    assert!(matches!(args.command, Some(Commands::Chat)));

    let args = parse_args(&["causerie", "chat", "-l", "chat.log"]);
    assert_eq!(args.log.as_deref(), Some("chat.log"));
}

#[test]
fn base_url_override_parses() {
    let args = parse_args(&["causerie", "--base-url", "http://localhost:8080/v1beta"]);
    assert_eq!(
        args.base_url.as_deref(),
        Some("http://localhost:8080/v1beta")
    );
}

#[test]
fn say_collects_the_prompt_words() {
    let args = parse_args(&["causerie", "say", "what", "time", "is", "it"]);
    match args.command {
        Some(Commands::Say {
            prompt,
            persona,
            search,
        }) => {
            assert_eq!(prompt, vec!["what", "time", "is", "it"]);
            assert!(persona.is_none());
            assert!(!search);
        }
        _ => panic!("expected say subcommand"),
    }
}

#[test]
fn say_accepts_persona_and_search_flags() {
    let args = parse_args(&["causerie", "say", "-p", "gemini-flash", "-s", "hello"]);
    match args.command {
        Some(Commands::Say {
            prompt,
            persona,
            search,
        }) => {
            assert_eq!(prompt, vec!["hello"]);
            assert_eq!(persona.as_deref(), Some("gemini-flash"));
            assert!(search);
        }
        _ => panic!("expected say subcommand"),
    }
}

#[test]
fn personas_subcommand_parses() {
    let args = parse_args(&["causerie", "personas"]);
    assert!(matches!(args.command, Some(Commands::Personas)));
}
