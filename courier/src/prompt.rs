//! Terminal interaction: asking for what the config doesn't say, and for
//! the go-ahead before sending.

use std::io::{self, BufRead, Write};

/// Prints `question` and reads one trimmed line.
///
/// # Errors
///
/// Fails if the terminal can't be written to or read from, or input ends.
pub fn ask(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> io::Result<String> {
    write!(output, "{question}")?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed before an answer was given",
        ));
    }

    Ok(answer.trim().to_string())
}

/// Shows the pre-flight warning and asks for confirmation. Only `y`
/// proceeds.
///
/// # Errors
///
/// Fails if the terminal can't be written to or read from.
pub fn confirm_send(
    input: &mut impl BufRead,
    output: &mut impl Write,
    pending: usize,
    sender: &str,
) -> io::Result<bool> {
    writeln!(output)?;
    writeln!(output, "{}", "!".repeat(60))?;
    writeln!(output, "  This is a live run: real messages will be sent.")?;
    writeln!(output, "  {pending} recipients are pending, sending as {sender}.")?;
    writeln!(output, "{}", "!".repeat(60))?;

    let answer = ask(input, output, "Confirm to proceed. (y/n) ")?;

    Ok(answer.eq_ignore_ascii_case("y"))
}
