//! The zero-shot ReAct text protocol.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::AgentAction;

const PREFIX: &str = "Answer the following questions as best you can. \
                      You have access to the following tools:";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

const SUFFIX: &str = "Begin!

Question: {input}
Thought:{agent_scratchpad}";

const FINAL_ANSWER_ACTION: &str = "Final Answer:";

/// Where the model must stop so that we can supply the observation.
pub(crate) const OBSERVATION_STOP: &str = "\nObservation:";

/// Appended to the scratchpad for the last, tool-less model call.
pub(crate) const GENERATE_FINAL_ANSWER: &str =
    "\n\nI now need to return a final answer based on the previous steps:";

/// The observation recorded for output that could not be parsed.
pub(crate) const INVALID_RESPONSE_OBSERVATION: &str =
    "Invalid or incomplete response";

/// The pseudo tool name recorded for output that could not be parsed.
pub(crate) const EXCEPTION_TOOL: &str = "_Exception";

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
        .expect("invalid action regex")
});

/// The prompt with the tool section filled in; `{input}` and
/// `{agent_scratchpad}` are left for [`format_prompt`].
pub(crate) fn build_template(tools: &[(&str, &str)]) -> String {
    let tool_strings = tools
        .iter()
        .map(|(name, description)| format!("{name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n");
    let tool_names = tools
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let format_instructions = FORMAT_INSTRUCTIONS.replace("{tool_names}", &tool_names);
    [PREFIX, &tool_strings, &format_instructions, SUFFIX].join("\n\n")
}

pub(crate) fn format_prompt(template: &str, input: &str, scratchpad: &str) -> String {
    // Placeholders are located in the template itself, so braces in tool
    // descriptions, the input or the scratchpad are left alone.
    let (head, tail) = template
        .rsplit_once("{agent_scratchpad}")
        .unwrap_or((template, ""));
    let mut prompt = match head.rsplit_once("{input}") {
        Some((before, after)) => [before, input, after].concat(),
        None => head.to_owned(),
    };
    prompt.push_str(scratchpad);
    prompt.push_str(tail);
    prompt
}

/// Cuts the text at the observation stop sequence, for providers that do
/// not honor stop sequences.
pub(crate) fn truncate_at_stop(text: &str) -> &str {
    match text.find(OBSERVATION_STOP) {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// What one step of the scratchpad looks like.
pub(crate) fn scratchpad_entry(log: &str, observation: &str) -> String {
    format!("{log}\nObservation: {observation}\nThought:")
}

/// A parsed model turn.
#[derive(Debug, PartialEq)]
pub(crate) enum Parsed {
    Action(AgentAction),
    Finish { output: String },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseError {
    BothActionAndAnswer,
    MissingAction,
    MissingActionInput,
}

pub(crate) fn parse(text: &str) -> Result<Parsed, ParseError> {
    let includes_answer = text.contains(FINAL_ANSWER_ACTION);
    if let Some(caps) = ACTION_RE.captures(text) {
        if includes_answer {
            return Err(ParseError::BothActionAndAnswer);
        }
        let tool = caps.get(1).map_or("", |m| m.as_str()).trim();
        let raw_input = caps.get(2).map_or("", |m| m.as_str());
        return Ok(Parsed::Action(AgentAction {
            tool: tool.to_owned(),
            tool_input: parse_tool_input(raw_input),
            log: text.to_owned(),
        }));
    }
    if includes_answer {
        let output = text
            .rsplit(FINAL_ANSWER_ACTION)
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned();
        return Ok(Parsed::Finish { output });
    }

    static ACTION_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)")
            .expect("invalid action regex")
    });
    if ACTION_ONLY_RE.is_match(text) {
        Err(ParseError::MissingActionInput)
    } else {
        Err(ParseError::MissingAction)
    }
}

/// Extracts the final answer if the text carries one, else returns the text.
pub(crate) fn final_answer_or_raw(text: &str) -> String {
    match parse(text) {
        Ok(Parsed::Finish { output }) => output,
        _ => text.trim().to_owned(),
    }
}

fn parse_tool_input(raw: &str) -> Value {
    let input = raw.trim().trim_matches('"');
    match serde_json::from_str::<Value>(input) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(input.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_template() {
        let template = build_template(&[
            ("calculator", "Useful for arithmetic."),
            ("terminal", "Runs a command line."),
        ]);
        assert!(template.starts_with(PREFIX));
        assert!(template.contains(
            "\n\ncalculator: Useful for arithmetic.\nterminal: Runs a command line.\n\n"
        ));
        assert!(template.contains("should be one of [calculator, terminal]"));

        let prompt = format_prompt(&template, "What is {input}?", " I {agent_scratchpad}.");
        assert!(prompt.ends_with("Question: What is {input}?\nThought: I {agent_scratchpad}."));
    }

    #[test]
    fn test_parse_action() {
        let text = "I need to compute.\nAction: calculator\nAction Input: 2 ^ 10";
        let Ok(Parsed::Action(action)) = parse(text) else {
            panic!("expected an action");
        };
        assert_eq!(action.tool, "calculator");
        assert_eq!(action.tool_input, json!("2 ^ 10"));
        assert_eq!(action.log, text);
    }

    #[test]
    fn test_parse_action_variants() {
        let Ok(Parsed::Action(action)) =
            parse("Action 1: terminal\nAction 1 Input: \"ls -la\"\n")
        else {
            panic!("expected an action");
        };
        assert_eq!(action.tool, "terminal");
        assert_eq!(action.tool_input, json!("ls -la"));

        let Ok(Parsed::Action(action)) =
            parse("Action: calculator\nAction Input: {\"expression\": \"1 + 1\"}")
        else {
            panic!("expected an action");
        };
        assert_eq!(action.tool_input, json!({ "expression": "1 + 1" }));

        // Scalars stay strings.
        let Ok(Parsed::Action(action)) = parse("Action: calculator\nAction Input: 42")
        else {
            panic!("expected an action");
        };
        assert_eq!(action.tool_input, json!("42"));
    }

    #[test]
    fn test_parse_final_answer() {
        assert_eq!(
            parse(" I now know the final answer\nFinal Answer: 1024\n"),
            Ok(Parsed::Finish {
                output: "1024".to_owned()
            })
        );
        assert_eq!(final_answer_or_raw("  no marker here "), "no marker here");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse("Action: calculator\nAction Input: 1\nFinal Answer: 1"),
            Err(ParseError::BothActionAndAnswer)
        );
        assert_eq!(parse("Action: calculator"), Err(ParseError::MissingActionInput));
        assert_eq!(parse("I am just musing."), Err(ParseError::MissingAction));
    }

    #[test]
    fn test_truncate_and_scratchpad() {
        let text = "Action: calculator\nAction Input: 1 + 1\nObservation: 2\nThought: done";
        assert_eq!(truncate_at_stop(text), "Action: calculator\nAction Input: 1 + 1");
        assert_eq!(
            scratchpad_entry("Action: calculator\nAction Input: 1 + 1", "2"),
            "Action: calculator\nAction Input: 1 + 1\nObservation: 2\nThought:"
        );
    }
}
