use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

/// Read the password as bytes, never leaving stray immutable copies around.
///
/// Sources in order:
///   KEYLOCKER_PASSWORD="secret" keylocker vault.bin --read
///   echo "secret" | keylocker vault.bin --read
///   interactive prompt on a TTY
pub fn read_password() -> Result<Zeroizing<Vec<u8>>> {
    if let Ok(mut pw) = std::env::var("KEYLOCKER_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(std::mem::take(&mut pw).into_bytes()));
        }
    }

    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(Zeroizing::new(std::mem::take(&mut *buf).into_bytes()));
        }
    }

    if io::stdin().is_terminal() {
        let mut pw = rpassword::prompt_password("Password: ")?;
        if !pw.is_empty() {
            return Ok(Zeroizing::new(std::mem::take(&mut pw).into_bytes()));
        }
    }

    bail!("No password provided")
}

/// Password with confirmation, for operations that write.
pub fn read_password_with_confirmation() -> Result<Zeroizing<Vec<u8>>> {
    if std::env::var("KEYLOCKER_PASSWORD").is_ok() {
        return read_password();
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());

        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;

        trim_newline(&mut pw1);
        trim_newline(&mut pw2);

        if pw1.is_empty() {
            bail!("password cannot be empty");
        }
        if *pw1 != *pw2 {
            bail!("passwords do not match");
        }

        return Ok(Zeroizing::new(std::mem::take(&mut *pw1).into_bytes()));
    }

    let mut pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }
    if *pw1 != *pw2 {
        bail!("passwords do not match");
    }

    Ok(Zeroizing::new(std::mem::take(&mut *pw1).into_bytes()))
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
