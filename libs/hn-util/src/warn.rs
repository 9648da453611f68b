//! Printing statements to stderr for diagnostics and debugging
//! purposes.
//!
//! Warnings go to stderr as `W: <message> at "<file>" line <n>`. While
//! a `capture` is active on the current thread, they are collected
//! instead, so that tests can check what was reported.

use std::cell::RefCell;
use std::fmt::Arguments;
use std::io::Write;

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = RefCell::new(None);
}

/// The implementation of `warn!`; not meant to be called directly.
pub fn emit(msg: Arguments, file: &str, line: u32) {
    let captured = CAPTURED.with(|c| {
        if let Some(v) = &mut *c.borrow_mut() {
            v.push(msg.to_string());
            true
        } else {
            false
        }
    });
    if !captured {
        let mut outp = std::io::BufWriter::new(std::io::stderr().lock());
        let _ = write!(&mut outp, "W: ");
        let _ = outp.write_fmt(msg);
        let _ = writeln!(&mut outp, " at {:?} line {}", file, line);
        let _ = outp.flush();
    }
}

/// Run `f` while collecting the messages of all `warn!` calls on this
/// thread; returns f's result and the messages in order. Nests: an
/// inner capture takes the messages of its extent only.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let outer = CAPTURED.with(|c| c.borrow_mut().replace(Vec::new()));
    let res = f();
    let msgs = CAPTURED.with(|c| {
        let mut c = c.borrow_mut();
        let msgs = c.take().unwrap_or_default();
        *c = outer;
        msgs
    });
    (res, msgs)
}

#[macro_export]
macro_rules! pp {
    ($namestr:expr, $val:expr) => {{
        let res = $val;
        eprintln!("{}: {:?}", $namestr, res);
        res
    }}
}

#[macro_export]
macro_rules! nopp {
    ($namestr:expr, $arg:expr) => {
        $arg
    }
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::warn::emit(format_args!($($arg)*), file!(), line!())
    }
}

#[macro_export]
macro_rules! nowarn {
    ($($arg:tt)*) => {
    }
}


#[cfg(test)]
mod tests {
    use super::capture;

    #[test]
    fn t_capture() {
        let ((), msgs) = capture(|| {
            crate::warn!("one {}", 1);
            let ((), inner) = capture(|| crate::warn!("inner"));
            assert_eq!(inner, vec!["inner".to_string()]);
            crate::warn!("two");
        });
        assert_eq!(msgs, vec!["one 1".to_string(), "two".to_string()]);
    }

    #[test]
    fn t_pp() {
        assert_eq!(crate::pp!("x", 1 + 2), 3);
        assert_eq!(crate::nopp!("x", 4), 4);
    }
}
