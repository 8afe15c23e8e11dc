use std::io::{BufRead, Write};
use std::path::Path;

use crate::config::{Destination, OutputFormat};
use crate::connection::PortSummary;
use crate::error::ConfigError;
use crate::persist;

/// Interactive questions for the values a session needs. Invalid answers are
/// asked again, only end of input or an explicit quit give up.
pub struct Prompter<R: BufRead, W: Write> {
    input: R,
    output: W,
}

pub fn stdio() -> Prompter<std::io::StdinLock<'static>, std::io::Stdout> {
    Prompter::new(std::io::stdin().lock(), std::io::stdout())
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Prompter<R, W> {
        Prompter { input, output }
    }

    fn ask(&mut self, question: &str) -> Result<String, ConfigError> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Err(ConfigError::InputClosed);
        }
        Ok(answer.trim().to_string())
    }

    fn say(&mut self, message: &str) -> Result<(), ConfigError> {
        writeln!(self.output, "{message}")?;
        Ok(())
    }

    pub fn choose_port(&mut self, ports: &[PortSummary]) -> Result<String, ConfigError> {
        if ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        let mut menu = String::from("Available serial ports:\n");
        for (i, port) in ports.iter().enumerate() {
            menu.push_str(&format!("-> {:>2}: {port}\n", i + 1));
        }
        menu.push_str(&format!("-> {:>2}: Quit\nWhich port would you like to connect to: ", "q"));

        loop {
            let answer = self.ask(&menu)?.to_lowercase();
            if answer == "q" || answer == "quit" {
                return Err(ConfigError::UserQuit);
            }
            match answer.parse::<usize>() {
                Ok(choice) if (1..=ports.len()).contains(&choice) => {
                    return Ok(ports[choice - 1].name.clone());
                }
                Ok(_) => self.say("That option is not available, try again.\n")?,
                Err(_) => self.say("You must enter a number, try again.\n")?,
            }
        }
    }

    pub fn ask_speed(&mut self, default: u32) -> Result<u32, ConfigError> {
        loop {
            let answer = self.ask(&format!("Enter the baud rate (default {default}): "))?;
            if answer.is_empty() {
                self.say("-> using default.")?;
                return Ok(default);
            }
            match answer.parse::<u32>() {
                Ok(speed) if speed > 0 => return Ok(speed),
                _ => self.say("Baud rate must be a positive integer, try again.\n")?,
            }
        }
    }

    pub fn ask_headers_printed(&mut self) -> Result<bool, ConfigError> {
        let answer = self.ask(
            "Are the column headers printed by the controller? (default yes)\n\
             If they are not, default headers will be generated: ",
        )?;
        Ok(matches!(answer.to_lowercase().as_str(), "" | "y" | "yes"))
    }

    pub fn ask_sample_count(&mut self, default: usize) -> Result<usize, ConfigError> {
        loop {
            let answer = self.ask(&format!("How many samples to collect? (default {default}): "))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match answer.parse::<usize>() {
                Ok(count) if count > 0 => return Ok(count),
                _ => self.say("You must enter a positive integer, try again.\n")?,
            }
        }
    }

    pub fn ask_destination(
        &mut self,
        directory: &Path,
        format: OutputFormat,
    ) -> Result<Destination, ConfigError> {
        self.say(&format!(
            "\nData is saved as a {} file (.{}).",
            format.label(),
            format.extension()
        ))?;
        let answer = self.ask("Enter a filename to save the data, or 'skip' not to save: ")?;
        Ok(persist::resolve_destination(&answer, directory, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn ports() -> Vec<PortSummary> {
        vec![
            PortSummary {
                name: "/dev/ttyS0".to_string(),
                description: "PCI".to_string(),
            },
            PortSummary {
                name: "/dev/ttyACM0".to_string(),
                description: "USB Arduino Uno 2341:0043".to_string(),
            },
        ]
    }

    #[test]
    fn test_choose_port() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a str,
            expected: Result<&'a str, ConfigError>,
        }
        let tests = [
            TestCase {
                name: "FirstChoice",
                input: "1\n",
                expected: Ok("/dev/ttyS0"),
            },
            TestCase {
                name: "RetryAfterInvalid",
                input: "abc\n0\n3\n2\n",
                expected: Ok("/dev/ttyACM0"),
            },
            TestCase {
                name: "Quit",
                input: "Q\n",
                expected: Err(ConfigError::UserQuit),
            },
            TestCase {
                name: "QuitLong",
                input: "x\nquit\n",
                expected: Err(ConfigError::UserQuit),
            },
            TestCase {
                name: "InputClosed",
                input: "9\n",
                expected: Err(ConfigError::InputClosed),
            },
        ];
        for case in tests {
            let got = prompter(case.input).choose_port(&ports());
            assert_eq!(
                got,
                case.expected.map(String::from),
                "{}",
                case.name
            );
        }
    }

    #[test]
    fn test_choose_port_without_ports() {
        assert_eq!(prompter("1\n").choose_port(&[]), Err(ConfigError::NoPorts));
    }

    #[test]
    fn test_port_menu_lists_ports() {
        let mut prompter = prompter("2\n");
        prompter.choose_port(&ports()).unwrap();
        let output = String::from_utf8(prompter.output).unwrap();
        assert!(output.contains("->  1: /dev/ttyS0 (PCI)"), "{output}");
        assert!(
            output.contains("->  2: /dev/ttyACM0 (USB Arduino Uno 2341:0043)"),
            "{output}"
        );
        assert!(output.contains("->  q: Quit"), "{output}");
    }

    #[test]
    fn test_ask_speed() {
        assert_eq!(prompter("\n").ask_speed(9600), Ok(9600));
        assert_eq!(prompter("115200\n").ask_speed(9600), Ok(115200));
        assert_eq!(prompter("fast\n0\n-1\n57600\n").ask_speed(9600), Ok(57600));
        assert_eq!(prompter("").ask_speed(9600), Err(ConfigError::InputClosed));
    }

    #[test]
    fn test_ask_headers_printed() {
        for (input, expected) in [
            ("\n", true),
            ("y\n", true),
            ("YES\n", true),
            ("n\n", false),
            ("no\n", false),
            ("whatever\n", false),
        ] {
            assert_eq!(
                prompter(input).ask_headers_printed(),
                Ok(expected),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_ask_sample_count() {
        assert_eq!(prompter("\n").ask_sample_count(20), Ok(20));
        assert_eq!(prompter("5\n").ask_sample_count(20), Ok(5));
        assert_eq!(prompter("0\nten\n10\n").ask_sample_count(20), Ok(10));
    }

    #[test]
    fn test_ask_destination() {
        let dir = Path::new("/data");
        assert_eq!(
            prompter("\n").ask_destination(dir, OutputFormat::Csv),
            Ok(Destination::Save(dir.join("Arduino_data.csv")))
        );
        assert_eq!(
            prompter("skip\n").ask_destination(dir, OutputFormat::Csv),
            Ok(Destination::Skip)
        );
        assert_eq!(
            prompter("run.csv\n").ask_destination(dir, OutputFormat::Csv),
            Ok(Destination::Save(dir.join("run.csv")))
        );
        assert_eq!(
            prompter("run\n").ask_destination(dir, OutputFormat::Space),
            Ok(Destination::Save(dir.join("run.txt")))
        );
    }

    #[test]
    fn test_ask_destination_names_format() {
        let mut csv = prompter("\n");
        csv.ask_destination(Path::new("/data"), OutputFormat::Csv)
            .unwrap();
        let output = String::from_utf8(csv.output).unwrap();
        assert!(output.contains("saved as a CSV file (.csv)"), "{output}");

        let mut space = prompter("\n");
        space
            .ask_destination(Path::new("/data"), OutputFormat::Space)
            .unwrap();
        let output = String::from_utf8(space.output).unwrap();
        assert!(
            output.contains("saved as a space-separated text file (.txt)"),
            "{output}"
        );
    }
}
