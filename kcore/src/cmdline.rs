//! Boot command line: a whitespace separated list of `flag` and `key=value` words.
//! Either side may be double quoted to include spaces or `=`.

use log::LevelFilter;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum CmdLineToken<'a> {
    Flag(&'a str),
    KeyValuePair(&'a str, &'a str),
}

/// Iterator over the tokens of a command line. Borrows from the input, never allocates.
pub struct CmdLine<'a> {
    rest: &'a str,
}

impl<'a> CmdLine<'a> {
    pub fn parse(raw: &'a str) -> CmdLine<'a> {
        CmdLine { rest: raw }
    }

    /// Split off one word. Unquoted words end at whitespace, and at `=` if `stop_at_equals`.
    /// An unterminated quote runs to the end of the line.
    fn word(&mut self, stop_at_equals: bool) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        if let Some(quoted) = self.rest.strip_prefix('"') {
            let (word, rest) = match quoted.find('"') {
                Some(pos) => (&quoted[..pos], &quoted[pos + 1..]),
                None => (quoted, ""),
            };
            self.rest = rest;
            return Some(word);
        }
        let end = self.rest
            .find(|c: char| c.is_whitespace() || (stop_at_equals && c == '='))
            .unwrap_or(self.rest.len());
        let (word, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(word)
    }
}

impl<'a> Iterator for CmdLine<'a> {
    type Item = CmdLineToken<'a>;

    fn next(&mut self) -> Option<CmdLineToken<'a>> {
        self.rest = self.rest.trim_start();
        let key = self.word(true)?;
        match self.rest.strip_prefix('=') {
            Some(after) => {
                self.rest = after;
                Some(CmdLineToken::KeyValuePair(key, self.word(false).unwrap_or("")))
            }
            None => Some(CmdLineToken::Flag(key)),
        }
    }
}

/// Runtime options taken from the command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Options {
    pub log_level: LevelFilter,
    /// Print the memory map and the region table after parsing them.
    pub memmap: bool,
    /// Exercise the memory core once it is up.
    pub selftest: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            log_level: LevelFilter::Info,
            memmap: false,
            selftest: false,
        }
    }
}

impl Options {
    pub fn from_cmdline(raw: &str) -> Options {
        let mut options = Options::default();
        for token in CmdLine::parse(raw) {
            match token {
                CmdLineToken::KeyValuePair("loglevel", value) => match parse_level(value) {
                    Some(level) => options.log_level = level,
                    None => warn!("[cmdline] unknown log level {:?}", value),
                },
                CmdLineToken::Flag("memmap") => options.memmap = true,
                CmdLineToken::Flag("selftest") => options.selftest = true,
                other => debug!("[cmdline] ignoring {:?}", other),
            }
        }
        options
    }
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    match value {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}
