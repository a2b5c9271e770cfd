/*!
 * Initial User Stack
 * Command-line parsing and the argc/argv layout handed to a new image
 */

use super::types::{LoadError, LoadResult};
use crate::core::limits::{MAX_ARGS, MAX_COMMAND_LINE, PAGE_SIZE, USER_STACK};
use crate::core::types::{Address, IntrFrame};
use crate::vm::AddressSpace;
use std::fmt;
use std::str::FromStr;

const WORD: usize = std::mem::size_of::<u64>();

/// A command line split into program name and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    /// Split on whitespace and check that the arguments fit the initial stack page
    pub fn parse(line: &str) -> LoadResult<Self> {
        if line.len() > MAX_COMMAND_LINE {
            return Err(LoadError::CommandLineTooLong {
                length: line.len(),
                max: MAX_COMMAND_LINE,
            });
        }
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if args.is_empty() {
            return Err(LoadError::EmptyCommandLine);
        }
        if args.len() > MAX_ARGS {
            return Err(LoadError::TooManyArguments {
                count: args.len(),
                max: MAX_ARGS,
            });
        }
        let needed = stack_bytes(&args);
        if needed > PAGE_SIZE {
            return Err(LoadError::ArgumentsTooLong(needed));
        }
        Ok(Self { args })
    }

    /// Program name (first word)
    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }
}

impl FromStr for CommandLine {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Bytes the argument block occupies below [`USER_STACK`]
fn stack_bytes(args: &[String]) -> usize {
    let strings: usize = args.iter().map(|arg| arg.len() + 1).sum();
    let padded = strings.div_ceil(WORD) * WORD;
    // argv pointers, argv[argc] and the fake return address
    padded + (args.len() + 2) * WORD
}

fn push(space: &mut AddressSpace, rsp: &mut Address, bytes: &[u8]) -> LoadResult<Address> {
    *rsp -= bytes.len();
    space.write(*rsp, bytes, *rsp)?;
    Ok(*rsp)
}

fn push_word(space: &mut AddressSpace, rsp: &mut Address, word: u64) -> LoadResult<()> {
    push(space, rsp, &word.to_le_bytes()).map(|_| ())
}

/// Lay out `argc`/`argv` on the stack page and build the entry frame.
///
/// From [`USER_STACK`] down: argument strings (last argument highest),
/// zero padding to a word boundary, a null `argv[argc]`, the `argv`
/// pointers with `argv[0]` lowest, and a null return address at `rsp`.
pub fn build_stack(
    space: &mut AddressSpace,
    command: &CommandLine,
    entry: Address,
) -> LoadResult<IntrFrame> {
    let mut rsp = USER_STACK;
    let mut pointers = vec![0 as Address; command.argc()];

    for (i, arg) in command.args().iter().enumerate().rev() {
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
        pointers[i] = push(space, &mut rsp, &bytes)?;
    }

    let padding = rsp % WORD;
    if padding > 0 {
        push(space, &mut rsp, &vec![0u8; padding])?;
    }

    push_word(space, &mut rsp, 0)?;
    for pointer in pointers.iter().rev() {
        push_word(space, &mut rsp, *pointer as u64)?;
    }
    let argv = rsp;
    push_word(space, &mut rsp, 0)?;

    let mut frame = IntrFrame::user(entry, rsp);
    frame.regs.rdi = command.argc() as u64;
    frame.regs.rsi = argv as u64;
    Ok(frame)
}
