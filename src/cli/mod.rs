pub mod actions;

use clap::{value_parser, Arg, ArgAction, Command};

fn light_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("color")
            .help("RED, YELLOW or GREEN")
            .required(true),
    )
    .arg(Arg::new("state").help("OFF, ON or BLINK").required(true))
}

/// Build the `mps-comm` command line.
pub fn command() -> Command {
    Command::new("mps-comm")
        .about("Drive RCLL production stations from the command line")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (TOML or JSON)")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("machine")
                .long("machine")
                .short('m')
                .help("Machine name; selects a configured machine or names an ad-hoc one")
                .value_name("NAME")
                .global(true),
        )
        .arg(
            Arg::new("station-type")
                .long("station-type")
                .help("Station type of an ad-hoc machine: BS, RS, CS, DS or SS")
                .value_name("TYPE")
                .global(true),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .help("Host of an ad-hoc machine, or of the SPS")
                .value_name("HOST")
                .global(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .help("Port of an ad-hoc machine, or of the SPS")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .global(true),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .help("Connection mode: plc, plc_simulation, mockup, mqtt, mqtt_legacy, modbus")
                .value_name("MODE")
                .default_value("mockup")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print events and results as JSON lines")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write the log to FILE")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("drain-timeout")
                .long("drain-timeout")
                .help("Seconds to wait for queued commands before giving up")
                .value_name("SECS")
                .default_value("10")
                .value_parser(value_parser!(u64))
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("reset").about("Reset the station"))
        .subcommand(Command::new("identify").about("Send the station type"))
        .subcommand(
            light_args(Command::new("light").about("Set a signal light")).arg(
                Arg::new("blink-ms")
                    .help("Blink period in ms")
                    .value_parser(value_parser!(u16))
                    .default_value("0"),
            ),
        )
        .subcommand(Command::new("reset-light").about("Switch the signal lights off"))
        .subcommand(
            Command::new("conveyor")
                .about("Move the conveyor belt")
                .arg(
                    Arg::new("direction")
                        .help("TO_OUTPUT or TO_INPUT")
                        .required(true),
                )
                .arg(Arg::new("sensor").help("IN, MID or OUT").required(true)),
        )
        .subcommand(
            Command::new("get-base")
                .about("Dispense a base")
                .arg(Arg::new("color").help("RED, SILVER or BLACK").required(true)),
        )
        .subcommand(Command::new("retrieve-cap").about("Buffer a cap"))
        .subcommand(Command::new("mount-cap").about("Mount the buffered cap"))
        .subcommand(
            Command::new("mount-ring")
                .about("Mount a ring")
                .arg(
                    Arg::new("feeder")
                        .help("Feeder 1 or 2")
                        .value_parser(value_parser!(u16))
                        .required(true),
                )
                .arg(
                    Arg::new("color")
                        .help("BLUE, GREEN, ORANGE or YELLOW")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("deliver").about("Deliver a product").arg(
                Arg::new("slot")
                    .help("Slot 1 to 3")
                    .value_parser(value_parser!(u16))
                    .required(true),
            ),
        )
        .subcommand(shelf_command("store", "Store a product"))
        .subcommand(shelf_command("retrieve", "Retrieve a product"))
        .subcommand(
            shelf_command("relocate", "Move a product to another shelf slot")
                .arg(
                    Arg::new("target-shelf")
                        .value_parser(value_parser!(u16))
                        .required(true),
                )
                .arg(
                    Arg::new("target-slot")
                        .value_parser(value_parser!(u16))
                        .required(true),
                ),
        )
        .subcommand(Command::new("watch").about("Print station events until Ctrl-C"))
        .subcommand(
            light_args(
                Command::new("sps-light")
                    .about("Set a light on the SPS")
                    .arg(Arg::new("sps-machine").help("M1..M10, D1..D3, TST, R1, R2").required(true)),
            ),
        )
        .subcommand(Command::new("sps-reset-lights").about("Switch all SPS lights off"))
        .subcommand(
            Command::new("sps-read-rfid")
                .about("Read RFID ids from the SPS")
                .arg(Arg::new("sps-machine").help("Single machine; all when omitted")),
        )
        .subcommand(
            Command::new("sps-write-rfid")
                .about("Write an RFID id on the SPS")
                .arg(Arg::new("sps-machine").required(true))
                .arg(
                    Arg::new("id")
                        .help("Puck id")
                        .value_parser(value_parser!(u32))
                        .required(true),
                ),
        )
}

fn shelf_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("shelf")
                .help("Shelf 0 to 5")
                .value_parser(value_parser!(u16))
                .required(true),
        )
        .arg(
            Arg::new("slot")
                .help("Slot 0 to 7")
                .value_parser(value_parser!(u16))
                .required(true),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> clap::ArgMatches {
    command().get_matches()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_consistent() {
        command().debug_assert();
    }

    #[test]
    fn test_parse_relocate() {
        let matches = command()
            .try_get_matches_from([
                "mps-comm", "--machine", "C-SS", "relocate", "1", "2", "3", "4",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "relocate");
        assert_eq!(sub.get_one::<u16>("target-slot"), Some(&4));
        assert_eq!(
            matches.get_one::<String>("machine").map(String::as_str),
            Some("C-SS")
        );
    }
}
