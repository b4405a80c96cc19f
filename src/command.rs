use std::borrow::Cow;

use shell_escape::unix::escape;

/// Builds a command line where every argument is shell-escaped and the program
/// is left as given.
///
/// [`Session::execute`](crate::Session::execute) sends its command verbatim,
/// so interpolating untrusted paths there changes the command itself. Use this
/// (or [`Session::execute_args`](crate::Session::execute_args)) instead.
pub fn shell_command<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut command = String::from(program);
    for arg in args {
        command.push(' ');
        command.push_str(&escape(Cow::Borrowed(arg.as_ref())));
    }
    command
}
