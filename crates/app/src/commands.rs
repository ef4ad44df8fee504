use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Command {
    Copy {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    Move {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    Duplicate {
        sources: Vec<PathBuf>,
    },
    Link {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    Trash {
        files: Vec<PathBuf>,
    },
    TrashList,
    Restore {
        originals: Vec<PathBuf>,
    },
    Mkdir {
        path: PathBuf,
    },
    Touch {
        path: PathBuf,
        contents: Option<String>,
    },
    Template {
        template: PathBuf,
        path: PathBuf,
    },
    Rename {
        path: PathBuf,
        new_name: String,
    },
    Chmod {
        mode: u32,
        path: PathBuf,
    },
    ChmodRecursive {
        file_mode: u32,
        file_mask: u32,
        dir_mode: u32,
        dir_mask: u32,
        path: PathBuf,
    },
    Chown {
        owner: String,
        path: PathBuf,
    },
    Chgrp {
        group: String,
        path: PathBuf,
    },
    Undo,
    Redo,
    History,
    Jobs,
    Cancel,
    Wait,
    Help,
    Quit,
}

impl Command {
    /// Whether the command enqueues a file operation.
    pub(crate) fn is_operation(&self) -> bool {
        !matches!(
            self,
            Self::TrashList
                | Self::Undo
                | Self::Redo
                | Self::History
                | Self::Jobs
                | Self::Cancel
                | Self::Wait
                | Self::Help
                | Self::Quit
        )
    }
}

/// One parsed shell line. A trailing `&` runs the operation without waiting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CommandLine {
    pub(crate) command: Command,
    pub(crate) background: bool,
}

pub(crate) const HELP: &str = "\
copy SRC... DEST         copy into directory DEST
move SRC... DEST         move into directory DEST
duplicate SRC...         copy next to the original
link SRC... DEST         symlink into directory DEST
trash FILE...            move to the trash
trash-list               show trash contents
restore ORIGINAL...      restore the newest trash entry for each path
mkdir PATH               create a folder
touch PATH [TEXT]        create a file
template TEMPLATE PATH   create a file from a template
rename PATH NAME         rename inside the same directory
chmod MODE PATH          set permission bits (octal)
chmod-r FM FMASK DM DMASK DIR
                         set file/dir bits under masks, recursively
chown OWNER PATH         change owner
chgrp GROUP PATH         change group
undo | redo | history    walk the undo history
jobs | cancel | wait     inspect, cancel or wait for queued jobs
quit

Append `&` to an operation to run it in the background.";

pub(crate) fn parse_line(line: &str) -> Result<Option<CommandLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut words =
        shlex::split(trimmed).ok_or_else(|| anyhow!("unbalanced quotes in: {trimmed}"))?;
    let background = words.last().is_some_and(|word| word == "&");
    if background {
        words.pop();
    }
    let Some((name, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = parse_command(name, args)?;
    if background && !command.is_operation() {
        bail!("`{name}` cannot run in the background");
    }
    Ok(Some(CommandLine {
        command,
        background,
    }))
}

fn parse_command(name: &str, args: &[String]) -> Result<Command> {
    let command = match name {
        "copy" | "cp" => {
            let (sources, destination) = sources_and_destination(name, args)?;
            Command::Copy {
                sources,
                destination,
            }
        }
        "move" | "mv" => {
            let (sources, destination) = sources_and_destination(name, args)?;
            Command::Move {
                sources,
                destination,
            }
        }
        "duplicate" => Command::Duplicate {
            sources: at_least_one(name, args)?,
        },
        "link" | "ln" => {
            let (sources, destination) = sources_and_destination(name, args)?;
            Command::Link {
                sources,
                destination,
            }
        }
        "trash" | "rm" => Command::Trash {
            files: at_least_one(name, args)?,
        },
        "trash-list" => {
            exactly(name, args, 0)?;
            Command::TrashList
        }
        "restore" => Command::Restore {
            originals: at_least_one(name, args)?,
        },
        "mkdir" => {
            exactly(name, args, 1)?;
            Command::Mkdir {
                path: PathBuf::from(&args[0]),
            }
        }
        "touch" => match args {
            [path] => Command::Touch {
                path: PathBuf::from(path),
                contents: None,
            },
            [path, contents] => Command::Touch {
                path: PathBuf::from(path),
                contents: Some(contents.clone()),
            },
            _ => bail!("usage: touch PATH [TEXT]"),
        },
        "template" => {
            exactly(name, args, 2)?;
            Command::Template {
                template: PathBuf::from(&args[0]),
                path: PathBuf::from(&args[1]),
            }
        }
        "rename" => {
            exactly(name, args, 2)?;
            Command::Rename {
                path: PathBuf::from(&args[0]),
                new_name: args[1].clone(),
            }
        }
        "chmod" => {
            exactly(name, args, 2)?;
            Command::Chmod {
                mode: parse_mode(&args[0])?,
                path: PathBuf::from(&args[1]),
            }
        }
        "chmod-r" => {
            exactly(name, args, 5)?;
            Command::ChmodRecursive {
                file_mode: parse_mode(&args[0])?,
                file_mask: parse_mode(&args[1])?,
                dir_mode: parse_mode(&args[2])?,
                dir_mask: parse_mode(&args[3])?,
                path: PathBuf::from(&args[4]),
            }
        }
        "chown" => {
            exactly(name, args, 2)?;
            Command::Chown {
                owner: args[0].clone(),
                path: PathBuf::from(&args[1]),
            }
        }
        "chgrp" => {
            exactly(name, args, 2)?;
            Command::Chgrp {
                group: args[0].clone(),
                path: PathBuf::from(&args[1]),
            }
        }
        "undo" => no_args(name, args, Command::Undo)?,
        "redo" => no_args(name, args, Command::Redo)?,
        "history" => no_args(name, args, Command::History)?,
        "jobs" => no_args(name, args, Command::Jobs)?,
        "cancel" => no_args(name, args, Command::Cancel)?,
        "wait" => no_args(name, args, Command::Wait)?,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command `{other}`; try `help`"),
    };
    Ok(command)
}

fn sources_and_destination(name: &str, args: &[String]) -> Result<(Vec<PathBuf>, PathBuf)> {
    let Some((destination, sources)) = args.split_last() else {
        bail!("usage: {name} SRC... DEST");
    };
    if sources.is_empty() {
        bail!("usage: {name} SRC... DEST");
    }
    Ok((
        sources.iter().map(PathBuf::from).collect(),
        PathBuf::from(destination),
    ))
}

fn at_least_one(name: &str, args: &[String]) -> Result<Vec<PathBuf>> {
    if args.is_empty() {
        bail!("`{name}` needs at least one path");
    }
    Ok(args.iter().map(PathBuf::from).collect())
}

fn exactly(name: &str, args: &[String], count: usize) -> Result<()> {
    if args.len() != count {
        bail!("`{name}` takes {count} argument(s), got {}", args.len());
    }
    Ok(())
}

fn no_args(name: &str, args: &[String], command: Command) -> Result<Command> {
    exactly(name, args, 0)?;
    Ok(command)
}

fn parse_mode(value: &str) -> Result<u32> {
    let mode = u32::from_str_radix(value, 8)
        .with_context(|| format!("`{value}` is not an octal mode"))?;
    if mode > 0o7777 {
        bail!("mode {value} is out of range");
    }
    Ok(mode)
}
