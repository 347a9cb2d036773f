//! Per-invocation standard I/O
//!
//! A worker thread holds at most one [`IoContext`] at a time, in a
//! thread-local slot. The substitute facilities reach it through
//! [`with_current`]. No other thread can observe it, so concurrent programs
//! never share input or output.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::str::FromStr;

use tracing::warn;

use crate::sandbox::HostFault;

thread_local! {
    static CURRENT: RefCell<Option<IoContext>> = const { RefCell::new(None) };
}

/// Input source and output buffer of one program invocation
#[derive(Debug)]
pub struct IoContext {
    input: InputCursor,
    output: Vec<u8>,
    max_output: Option<usize>,
}

impl IoContext {
    pub fn new(stdin: &str, max_output: Option<usize>) -> Self {
        Self {
            input: InputCursor::new(stdin.as_bytes().to_vec()),
            output: Vec::new(),
            max_output,
        }
    }

    /// Install a context primed with `stdin` on the current thread.
    ///
    /// The context lives until the returned guard is dropped, which must
    /// happen on the same thread.
    pub fn install(stdin: &str, max_output: Option<usize>) -> IoGuard {
        CURRENT.with(|slot| {
            let previous = slot.replace(Some(IoContext::new(stdin, max_output)));
            if previous.is_some() {
                warn!("replaced an I/O context left behind on this thread");
            }
        });
        IoGuard {
            _not_send: PhantomData,
        }
    }

    pub fn input(&mut self) -> &mut InputCursor {
        &mut self.input
    }

    /// Append program output, failing once the output cap would be exceeded
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), HostFault> {
        if let Some(max) = self.max_output
            && self.output.len().saturating_add(bytes.len()) > max
        {
            return Err(HostFault::OutputLimitExceeded);
        }
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    /// Drain the output written so far
    pub fn take_output(&mut self) -> String {
        let output = std::mem::take(&mut self.output);
        String::from_utf8_lossy(&output).into_owned()
    }
}

/// Removes the current thread's [`IoContext`] when dropped
#[derive(Debug)]
pub struct IoGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for IoGuard {
    fn drop(&mut self) {
        // try_with: the slot may already be gone during thread teardown
        let _ = CURRENT.try_with(|slot| slot.borrow_mut().take());
    }
}

/// Run `f` against the current thread's context
pub fn with_current<R>(
    f: impl FnOnce(&mut IoContext) -> Result<R, HostFault>,
) -> Result<R, HostFault> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let context = slot.as_mut().ok_or(HostFault::NoContext)?;
        f(context)
    })
}

/// Drain and return everything written on this thread so far
pub fn capture_output() -> String {
    with_current(|context| Ok(context.take_output())).unwrap_or_default()
}

/// Check whether a context is installed on this thread
pub fn is_installed() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Token-oriented cursor over stdin bytes
#[derive(Debug, Clone)]
pub struct InputCursor {
    data: Vec<u8>,
    pos: usize,
}

impl InputCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Read one raw byte
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Check whether another whitespace-delimited token remains
    pub fn has_next(&self) -> bool {
        self.peek_token().is_some()
    }

    /// Check whether any input remains, even an empty line
    pub fn has_next_line(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Check whether the next token parses as `T`
    pub fn has_next_parsed<T: FromStr>(&self) -> bool {
        self.peek_token()
            .and_then(|range| std::str::from_utf8(&self.data[range.0..range.1]).ok())
            .is_some_and(|token| token.parse::<T>().is_ok())
    }

    /// Read the next whitespace-delimited token
    pub fn next_token(&mut self) -> Option<Vec<u8>> {
        let (start, end) = self.peek_token()?;
        self.pos = end;
        Some(self.data[start..end].to_vec())
    }

    /// Parse the next token as `T`. A token that does not parse is left unread.
    pub fn next_parsed<T: FromStr>(&mut self, expected: &'static str) -> Result<T, HostFault> {
        let (start, end) = self.peek_token().ok_or(HostFault::NoSuchElement)?;
        let token = String::from_utf8_lossy(&self.data[start..end]);
        match token.parse::<T>() {
            Ok(value) => {
                self.pos = end;
                Ok(value)
            }
            Err(_) => Err(HostFault::InputMismatch {
                token: token.into_owned(),
                expected,
            }),
        }
    }

    /// Read the rest of the current line, without its terminator
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        if !self.has_next_line() {
            return None;
        }

        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(newline) => (&rest[..newline], newline + 1),
            None => (rest, rest.len()),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line).to_vec();
        self.pos += consumed;
        Some(line)
    }

    fn peek_token(&self) -> Option<(usize, usize)> {
        let rest = &self.data[self.pos..];
        let start = self.pos + rest.iter().position(|b| !b.is_ascii_whitespace())?;
        let end = self.data[start..]
            .iter()
            .position(u8::is_ascii_whitespace)
            .map_or(self.data.len(), |len| start + len);
        Some((start, end))
    }
}
