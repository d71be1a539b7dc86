use std::str::FromStr;

use crate::axis::AxisFilter;

use super::{AxisArgs, Command, CommandError};

/// One console line split into its code (`M122`) and parameter words
/// (`X`, `S1`, `E600`). Anything after `;` is a comment.
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeLine {
    pub letter: char,
    pub number: u16,
    pub words: Vec<(char, Option<String>)>,
}

impl GcodeLine {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let code = line.split(';').next().unwrap_or_default().trim();
        let mut tokens = code.split_whitespace();

        let head = tokens.next().ok_or(CommandError::Empty)?;
        let (letter, number) = split_word(head);
        let number = number
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or_else(|| CommandError::Unknown(code.to_string()))?;

        let words = tokens
            .map(|token| {
                let (letter, value) = split_word(token);
                if letter.is_ascii_alphabetic() {
                    Ok((letter, value.map(str::to_string)))
                } else {
                    Err(CommandError::InvalidWord(token.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            letter,
            number,
            words,
        })
    }

    pub fn has(&self, letter: char) -> bool {
        self.words.iter().any(|(l, _)| *l == letter)
    }

    pub fn value(&self, letter: char) -> Option<&str> {
        self.words
            .iter()
            .find(|(l, _)| *l == letter)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Axis letters named on the line, with or without a value.
    pub fn axis_filter(&self) -> AxisFilter {
        self.words
            .iter()
            .filter_map(|(letter, _)| AxisFilter::from_letter(*letter))
            .fold(AxisFilter::empty(), |filter, letter| filter | letter)
    }

    fn axis_args<T: FromStr>(&self) -> Result<AxisArgs<T>, CommandError> {
        let mut args = AxisArgs {
            selected: AxisFilter::empty(),
            values: Vec::new(),
        };

        for (letter, value) in &self.words {
            let Some(axis) = AxisFilter::from_letter(*letter) else {
                continue;
            };
            args.selected |= axis;

            if let Some(value) = value {
                let parsed = value.parse::<T>().map_err(|_| CommandError::InvalidValue {
                    letter: *letter,
                    value: value.clone(),
                })?;
                args.values.push((axis, parsed));
            }
        }

        Ok(args)
    }
}

fn split_word(token: &str) -> (char, Option<&str>) {
    let mut chars = token.chars();
    let letter = chars.next().unwrap_or_default().to_ascii_uppercase();
    let rest = chars.as_str();
    (letter, (!rest.is_empty()).then_some(rest))
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let gcode = GcodeLine::parse(line)?;
    let unknown = || CommandError::Unknown(line.trim().to_string());

    if gcode.letter != 'M' {
        return Err(unknown());
    }

    let command = match gcode.number {
        122 => {
            if let Some(state) = gcode.value('S') {
                match state {
                    "0" => Command::SetReporting(false),
                    "1" => Command::SetReporting(true),
                    _ => {
                        return Err(CommandError::InvalidValue {
                            letter: 'S',
                            value: state.to_string(),
                        });
                    }
                }
            } else if gcode.has('V') {
                Command::DumpRegisters {
                    filter: gcode.axis_filter(),
                }
            } else if gcode.has('T') {
                Command::TestConnection {
                    filter: gcode.axis_filter(),
                }
            } else {
                Command::Report {
                    filter: gcode.axis_filter(),
                }
            }
        }
        906 => Command::Current(gcode.axis_args()?),
        911 => Command::ReportPrewarn {
            filter: gcode.axis_filter(),
        },
        912 => Command::ClearPrewarn {
            filter: gcode.axis_filter(),
        },
        913 => Command::HybridThreshold(gcode.axis_args()?),
        914 => Command::StallThreshold(gcode.axis_args()?),
        75 => Command::StartTimer,
        76 => Command::PauseTimer,
        77 => Command::StopTimer,
        _ => return Err(unknown()),
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_code_and_words() {
        let line = GcodeLine::parse("m906 X800 e ; set X only").unwrap();
        assert_eq!(line.letter, 'M');
        assert_eq!(line.number, 906);
        assert_eq!(
            line.words,
            vec![('X', Some("800".to_string())), ('E', None)]
        );
        assert_eq!(line.axis_filter(), AxisFilter::X | AxisFilter::E);
    }

    #[test]
    fn m122_variants() {
        assert_eq!(
            parse_command("M122").unwrap(),
            Command::Report {
                filter: AxisFilter::empty()
            }
        );
        assert_eq!(parse_command("M122 S1").unwrap(), Command::SetReporting(true));
        assert_eq!(parse_command("M122 S0").unwrap(), Command::SetReporting(false));
        assert_eq!(
            parse_command("M122 V X Z").unwrap(),
            Command::DumpRegisters {
                filter: AxisFilter::X | AxisFilter::Z
            }
        );
        assert_eq!(
            parse_command("M122 T").unwrap(),
            Command::TestConnection {
                filter: AxisFilter::empty()
            }
        );
    }

    #[test]
    fn axis_values_are_typed() {
        let Command::StallThreshold(args) = parse_command("M914 X-5 Y").unwrap() else {
            panic!("expected M914");
        };
        assert_eq!(args.selected, AxisFilter::X | AxisFilter::Y);
        assert_eq!(args.values, vec![(AxisFilter::X, -5i8)]);

        assert!(matches!(
            parse_command("M906 X12ab"),
            Err(CommandError::InvalidValue { letter: 'X', .. })
        ));
    }

    #[test]
    fn rejects_unknown_and_empty_lines() {
        assert!(matches!(parse_command("G1 X10"), Err(CommandError::Unknown(_))));
        assert!(matches!(parse_command("M999"), Err(CommandError::Unknown(_))));
        assert!(matches!(parse_command("   ; only a comment"), Err(CommandError::Empty)));
        assert!(matches!(parse_command("M122 S2"), Err(CommandError::InvalidValue { .. })));
        assert!(matches!(parse_command("M906 800"), Err(CommandError::InvalidWord(_))));
    }
}
