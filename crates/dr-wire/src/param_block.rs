//! The ASCII parameter block sent back on `TakeSimulationParameters`
//! (spec.md §4.1, §6). Newline-separated, space-separated fields, order
//! flexible on read; written in a fixed order here for determinism.

use crate::error::{ProtocolError, WireResult};

/// One `TakeSimulationParameters` payload. Every `Vec` field carries
/// `N_samesystem_uncoupled` values when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBlock {
    pub force: Option<Vec<f64>>,
    pub wref: Vec<f64>,
    pub wref2: Option<Vec<f64>>,
    pub wrefchange: Option<Vec<f64>>,
    pub wrefchange2: Option<Vec<f64>>,
    pub samp_n_steps: u32,
    pub rnd_seed: i64,
    pub message: Option<String>,
}

fn format_values(values: &[f64]) -> String {
    values.iter().map(|v| format!("{v:.6}")).collect::<Vec<_>>().join(" ")
}

impl ParameterBlock {
    pub fn to_ascii(&self) -> String {
        let mut lines = Vec::new();
        if let Some(force) = &self.force {
            lines.push(format!("force {}", format_values(force)));
        }
        lines.push(format!("wref {}", format_values(&self.wref)));
        if let Some(wref2) = &self.wref2 {
            lines.push(format!("wref2 {}", format_values(wref2)));
        }
        if let Some(wrefchange) = &self.wrefchange {
            lines.push(format!("wrefchange {}", format_values(wrefchange)));
        }
        if let Some(wrefchange2) = &self.wrefchange2 {
            lines.push(format!("wrefchange2 {}", format_values(wrefchange2)));
        }
        lines.push(format!("sampNsteps {}", self.samp_n_steps));
        lines.push(format!("rnd {}", self.rnd_seed));
        if let Some(message) = &self.message {
            lines.push(format!("MESSAGE {message}"));
        }
        let mut block = lines.join("\n");
        block.push('\n');
        block
    }

    pub fn from_ascii(text: &str) -> WireResult<Self> {
        let mut block = ParameterBlock::default();
        for line in text.lines() {
            if line.len() > dr_types::MAX_PARAMETER_LINE_LENGTH {
                return Err(ProtocolError::ParameterLineTooLong(line.len()));
            }
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else { continue };
            let rest: Vec<&str> = tokens.collect();
            match key {
                "force" => block.force = Some(parse_floats(&rest)?),
                "wref" => block.wref = parse_floats(&rest)?,
                "wref2" => block.wref2 = Some(parse_floats(&rest)?),
                "wrefchange" => block.wrefchange = Some(parse_floats(&rest)?),
                "wrefchange2" => block.wrefchange2 = Some(parse_floats(&rest)?),
                "sampNsteps" => {
                    block.samp_n_steps = rest
                        .first()
                        .and_then(|s| s.parse().ok())
                        .ok_or(ProtocolError::MalformedParameterBlock)?;
                }
                "rnd" => {
                    block.rnd_seed = rest
                        .first()
                        .and_then(|s| s.parse().ok())
                        .ok_or(ProtocolError::MalformedParameterBlock)?;
                }
                "MESSAGE" => block.message = Some(rest.join(" ")),
                _ => return Err(ProtocolError::MalformedParameterBlock),
            }
        }
        Ok(block)
    }
}

fn parse_floats(tokens: &[&str]) -> WireResult<Vec<f64>> {
    tokens
        .iter()
        .map(|t| t.parse::<f64>().map_err(|_| ProtocolError::MalformedParameterBlock))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_minimal_block() {
        let block = ParameterBlock {
            force: None,
            wref: vec![0.0],
            wref2: None,
            wrefchange: None,
            wrefchange2: None,
            samp_n_steps: 1,
            rnd_seed: 42,
            message: None,
        };
        let ascii = block.to_ascii();
        assert_eq!(ascii, "wref 0.000000\nsampNsteps 1\nrnd 42\n");
        let parsed = ParameterBlock::from_ascii(&ascii).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn round_trips_a_full_block_with_message() {
        let block = ParameterBlock {
            force: Some(vec![5.0]),
            wref: vec![1.0, 2.0],
            wref2: Some(vec![0.5]),
            wrefchange: Some(vec![1.1]),
            wrefchange2: Some(vec![0.6]),
            samp_n_steps: 100,
            rnd_seed: -7,
            message: Some("HOLD_AND_CONTACT 10.0.0.5".to_string()),
        };
        let parsed = ParameterBlock::from_ascii(&block.to_ascii()).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(ParameterBlock::from_ascii("bogus 1 2 3\n").is_err());
    }
}
