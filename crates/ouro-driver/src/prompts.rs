//! System prompt and seed program for the agent turn loop.
//!
//! The system prompt is prepended by the chat client on every request and
//! never stored in the conversation history. The seed program is the first
//! thing executed in a fresh sandbox; its output becomes the opening user
//! message so the model starts with a picture of what `context` holds.

/// The fixed system prompt for every agent in the tree.
pub const SYSTEM_PROMPT: &str = r#"You are an agent that answers queries over contexts too large to read at once.

The context is NOT in this conversation. It is bound to the variable `context` inside a persistent Python REPL. You interact with it by writing code; the REPL's output is fed back to you on each turn.

## REPL

Write Python inside a ```repl fenced block. Only ```repl blocks are executed; anything else is commentary. Variables persist between turns.

Pre-bound names:
- `context` - the full input (usually a string)
- `llm_query(prompt)` - spawn a sub-agent on `prompt` and return its final answer; use it to delegate work over slices of the context instead of printing them
- `FINAL(value)` / `FINAL_VAR(value)` - submit `value` as your final result and stop

## Strategy

1. **Probe** - inspect `context` with cheap operations first: length, structure, slices
2. **Decompose** - split large work into chunks and hand each chunk to `llm_query`
3. **Combine** - merge sub-agent answers in the REPL, where they are plain Python values
4. **Finish** - call `FINAL(...)` the moment you can answer

## Guidelines

- Output is truncated to its tail; print summaries and slices, never the whole context
- `llm_query` results come back as values in your namespace, not as chat text - store them
- Sub-agents see only what you pass them; include the question and the relevant slice in the prompt
- One focused ```repl block per turn
- An `Error:` line in the output means your code raised; read it and adapt

## Termination

You MUST end by calling `FINAL(answer)` (or `FINAL_VAR(variable)`) inside a ```repl block. A reply without it just continues the loop and spends budget."#;

/// Python executed once in every fresh sandbox to describe `context`.
///
/// Prints the type, the length, and either the full value (small contexts)
/// or a head/tail slice.
pub const SEED_PROGRAM: &str = r#"print(f"Context type: {type(context).__name__}")
print(f"Context length: {len(context)}")
if len(context) <= 500:
    print(context)
else:
    print(context[:500])
    print("...")
    print(context[-500:])"#;

/// The opening user message: truncation notice, the seed program as the
/// model will see its own code, and the captured seed output.
pub fn seed_message(truncate_len: usize, seed_output: &str) -> String {
    format!(
        "Outputs will always be truncated to last {truncate_len} characters.\n\n\
         ```repl\n{SEED_PROGRAM}\n```\n\nOutput:\n{seed_output}"
    )
}

/// Synthetic user message appended when a reply carried no `repl` block.
pub const NO_CODE_MESSAGE: &str =
    "Error: We could not extract code because you may not have used repl block!";
