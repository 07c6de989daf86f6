//! SVF lexer and parser: spec.md §4.4.

use crate::bitvec::{parse_hex_lsb, BitVec};
use crate::error::JtagError;
use crate::svf::{Command, TrstMode};
use crate::tap::TapState;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Paren(String),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { chars: input.chars().peekable(), line: 1 }
    }

    /// Tokenize the whole input, returning tokens grouped into one `Vec`
    /// per `;`-terminated command, each tagged with the line it started on.
    fn commands(mut self) -> Result<Vec<(usize, Vec<Token>)>, JtagError> {
        let mut commands = Vec::new();
        let mut current = Vec::new();
        let mut start_line = self.line;
        let mut in_command = false;

        loop {
            self.skip_whitespace_and_comments();
            let Some(&c) = self.chars.peek() else { break };
            if !in_command {
                start_line = self.line;
                in_command = true;
            }
            match c {
                ';' => {
                    self.chars.next();
                    if !current.is_empty() {
                        commands.push((start_line, std::mem::take(&mut current)));
                    }
                    in_command = false;
                }
                '(' => {
                    self.chars.next();
                    let mut content = String::new();
                    loop {
                        match self.chars.next() {
                            Some(')') => break,
                            Some(ch) => {
                                if ch == '\n' {
                                    self.line += 1;
                                }
                                if !ch.is_whitespace() {
                                    content.push(ch);
                                }
                            }
                            None => {
                                return Err(JtagError::ParseError {
                                    line: start_line,
                                    detail: "unterminated parenthesised literal".to_string(),
                                })
                            }
                        }
                    }
                    current.push(Token::Paren(content));
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&ch) = self.chars.peek() {
                        if ch.is_whitespace() || ch == ';' || ch == '(' || ch == '!' {
                            break;
                        }
                        word.push(ch);
                        self.chars.next();
                    }
                    if word.is_empty() {
                        // Stray character (e.g. a bare '!' not at start of
                        // token): skip it to make forward progress.
                        self.chars.next();
                        continue;
                    }
                    current.push(Token::Word(word));
                }
            }
        }
        if !current.is_empty() {
            return Err(JtagError::ParseError {
                line: start_line,
                detail: "unterminated command (missing ';')".to_string(),
            });
        }
        Ok(commands)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('!') => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => break,
            }
        }
    }
}

fn parse_state_name(word: &str) -> Option<TapState> {
    match word.to_ascii_uppercase().as_str() {
        "RESET" => Some(TapState::Reset),
        "IDLE" => Some(TapState::Idle),
        "DRSELECT" => Some(TapState::DrSelect),
        "DRCAPTURE" => Some(TapState::DrCapture),
        "DRSHIFT" => Some(TapState::DrShift),
        "DREXIT1" => Some(TapState::DrExit1),
        "DRPAUSE" => Some(TapState::DrPause),
        "DREXIT2" => Some(TapState::DrExit2),
        "DRUPDATE" => Some(TapState::DrUpdate),
        "IRSELECT" => Some(TapState::IrSelect),
        "IRCAPTURE" => Some(TapState::IrCapture),
        "IRSHIFT" => Some(TapState::IrShift),
        "IREXIT1" => Some(TapState::IrExit1),
        "IRPAUSE" => Some(TapState::IrPause),
        "IREXIT2" => Some(TapState::IrExit2),
        "IRUPDATE" => Some(TapState::IrUpdate),
        _ => None,
    }
}

struct CommandParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
}

impl<'t> CommandParser<'t> {
    fn new(tokens: &'t [Token], line: usize) -> Self {
        Self { tokens, pos: 0, line }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn err(&self, detail: impl Into<String>) -> JtagError {
        JtagError::ParseError { line: self.line, detail: detail.into() }
    }

    fn next_word(&mut self) -> Result<String, JtagError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w.clone()),
            other => Err(self.err(format!("expected word, found {:?}", other))),
        }
    }

    fn next_state(&mut self) -> Result<TapState, JtagError> {
        let w = self.next_word()?;
        parse_state_name(&w).ok_or_else(|| self.err(format!("unknown TAP state {:?}", w)))
    }

    fn next_usize(&mut self) -> Result<usize, JtagError> {
        let w = self.next_word()?;
        w.parse().map_err(|_| self.err(format!("expected integer, found {:?}", w)))
    }

    fn next_float(&mut self) -> Result<f64, JtagError> {
        let w = self.next_word()?;
        w.parse().map_err(|_| self.err(format!("expected number, found {:?}", w)))
    }

    fn next_paren(&mut self) -> Result<String, JtagError> {
        match self.next() {
            Some(Token::Paren(s)) => Ok(s.clone()),
            other => Err(self.err(format!("expected parenthesised literal, found {:?}", other))),
        }
    }

    /// Parse the `TDI(...) TDO(...) MASK(...) SMASK(...)` tail common to
    /// `SIR`/`SDR`/`HIR`/`TIR`/`HDR`/`TDR`.
    fn parse_shift_params(&mut self, bits: usize) -> Result<ShiftParams, JtagError> {
        let mut tdi = None;
        let mut tdo = None;
        let mut mask = None;
        loop {
            match self.peek() {
                Some(Token::Word(w)) => {
                    let tag = w.to_ascii_uppercase();
                    if !matches!(tag.as_str(), "TDI" | "TDO" | "MASK" | "SMASK") {
                        break;
                    }
                    self.next();
                    let hex = self.next_paren()?;
                    let v = parse_hex_lsb(&hex, bits).map_err(|d| self.err(d))?;
                    match tag.as_str() {
                        "TDI" => tdi = Some(v),
                        "TDO" => tdo = Some(v),
                        "MASK" => mask = Some(v),
                        _ => {} // SMASK: accepted, not used downstream
                    }
                }
                _ => break,
            }
        }
        Ok(ShiftParams {
            tdi: tdi.unwrap_or_else(|| BitVec::zeros(bits)),
            tdo,
            mask,
        })
    }
}

struct ShiftParams {
    tdi: BitVec,
    tdo: Option<BitVec>,
    mask: Option<BitVec>,
}

/// Parse a complete SVF document into an ordered command list.
pub fn parse(input: &str) -> Result<Vec<Command>, JtagError> {
    let commands = Lexer::new(input).commands()?;
    let mut out = Vec::with_capacity(commands.len());
    for (line, tokens) in commands {
        out.push(parse_command(&tokens, line)?);
    }
    Ok(out)
}

fn parse_command(tokens: &[Token], line: usize) -> Result<Command, JtagError> {
    let mut p = CommandParser::new(tokens, line);
    let keyword = p.next_word()?;
    match keyword.to_ascii_uppercase().as_str() {
        "STATE" => {
            let mut path = Vec::new();
            while p.peek().is_some() {
                path.push(p.next_state()?);
            }
            if path.is_empty() {
                return Err(p.err("STATE requires at least one state"));
            }
            Ok(Command::State(path))
        }
        "ENDIR" => Ok(Command::EndIr(p.next_state()?)),
        "ENDDR" => Ok(Command::EndDr(p.next_state()?)),
        "HIR" | "TIR" | "HDR" | "TDR" => {
            let bits = p.next_usize()?;
            let params = p.parse_shift_params(bits)?;
            Ok(match keyword.to_ascii_uppercase().as_str() {
                "HIR" => Command::Hir(params.tdi),
                "TIR" => Command::Tir(params.tdi),
                "HDR" => Command::Hdr(params.tdi),
                _ => Command::Tdr(params.tdi),
            })
        }
        "SIR" | "SDR" => {
            let bits = p.next_usize()?;
            let params = p.parse_shift_params(bits)?;
            let shift = Command::Shift {
                dr: keyword.eq_ignore_ascii_case("SDR"),
                bits,
                tdi: params.tdi,
                tdo: params.tdo,
                mask: params.mask,
            };
            Ok(shift)
        }
        "RUNTEST" => parse_runtest(&mut p),
        "FREQUENCY" => {
            if p.peek().is_none() {
                return Ok(Command::Frequency(None));
            }
            let hz = p.next_float()?;
            // Optional trailing "HZ" unit token.
            if let Some(Token::Word(w)) = p.peek() {
                if w.eq_ignore_ascii_case("HZ") {
                    p.next();
                }
            }
            Ok(Command::Frequency(Some(hz)))
        }
        "TRST" => {
            let w = p.next_word()?;
            let mode = match w.to_ascii_uppercase().as_str() {
                "ON" => TrstMode::On,
                "OFF" => TrstMode::Off,
                "Z" => TrstMode::HighZ,
                "ABSENT" => TrstMode::Absent,
                other => return Err(p.err(format!("unknown TRST mode {:?}", other))),
            };
            Ok(Command::Trst(mode))
        }
        other => Ok(Command::Unknown(other.to_string())),
    }
}

fn parse_runtest(p: &mut CommandParser) -> Result<Command, JtagError> {
    let mut run_state = None;
    if let Some(Token::Word(w)) = p.peek() {
        if parse_state_name(w).is_some() {
            run_state = Some(p.next_state()?);
        }
    }

    let mut cycles = None;
    let mut min_time = None;
    let mut end_state = None;

    while p.peek().is_some() {
        let save = p.pos;
        match p.next_word() {
            Ok(w) if w.eq_ignore_ascii_case("ENDSTATE") => {
                end_state = Some(p.next_state()?);
            }
            Ok(w) if w.eq_ignore_ascii_case("MAXIMUM") => {
                let _max = p.next_float()?;
                if let Some(Token::Word(u)) = p.peek() {
                    if u.eq_ignore_ascii_case("SEC") {
                        p.next();
                    }
                }
            }
            Ok(w) if w.eq_ignore_ascii_case("MIN") => {
                min_time = Some(p.next_float()?);
                if let Some(Token::Word(u)) = p.peek() {
                    if u.eq_ignore_ascii_case("SEC") {
                        p.next();
                    }
                }
            }
            Ok(w) => {
                // A bare number is a run_count; what follows names its unit.
                if let Ok(n) = w.parse::<f64>() {
                    match p.peek() {
                        Some(Token::Word(u)) if u.eq_ignore_ascii_case("TCK") || u.eq_ignore_ascii_case("SCK") => {
                            p.next();
                            cycles = Some(n as usize);
                        }
                        Some(Token::Word(u)) if u.eq_ignore_ascii_case("SEC") => {
                            p.next();
                            min_time = Some(n);
                        }
                        _ => {
                            p.pos = save;
                            return Err(p.err(format!("unexpected token after RUNTEST count {:?}", w)));
                        }
                    }
                } else {
                    p.pos = save;
                    return Err(p.err(format!("unexpected RUNTEST token {:?}", w)));
                }
            }
            Err(e) => return Err(e),
        }
    }

    let run_state = run_state.unwrap_or(TapState::Idle);
    Ok(Command::RunTest {
        run_state,
        cycles,
        min_time_secs: min_time,
        end_state: end_state.unwrap_or(run_state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sdr_with_tdi_tdo_mask() {
        let cmds = parse("SDR 16 TDI (ABCD) TDO (1234) MASK (FFFF);").unwrap();
        assert_eq!(cmds.len(), 1);
        match &cmds[0] {
            Command::Shift { dr, bits, tdo, mask, .. } => {
                assert!(*dr);
                assert_eq!(*bits, 16);
                assert!(tdo.is_some());
                assert!(mask.is_some());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_glued_paren_tokens() {
        let cmds = parse("SIR 8 TDI(FF);").unwrap();
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn strips_comments_and_spans_lines() {
        let cmds = parse("! a comment\nSTATE\n  IDLE ; ! trailing\nFREQUENCY 1E6 HZ;").unwrap();
        assert_eq!(cmds.len(), 2);
    }

    #[test]
    fn parses_runtest_with_endstate() {
        let cmds = parse("RUNTEST IDLE 100 TCK ENDSTATE IDLE;").unwrap();
        match &cmds[0] {
            Command::RunTest { cycles, end_state, .. } => {
                assert_eq!(*cycles, Some(100));
                assert_eq!(*end_state, TapState::Idle);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_preserved_not_rejected() {
        let cmds = parse("PIO 0101;").unwrap();
        assert_eq!(cmds, vec![Command::Unknown("PIO".to_string())]);
    }

    #[test]
    fn unterminated_command_is_parse_error() {
        let err = parse("STATE IDLE").unwrap_err();
        match err {
            JtagError::ParseError { .. } => {}
            other => panic!("expected ParseError, got {:?}", other),
        }
    }
}
