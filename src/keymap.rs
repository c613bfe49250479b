//! Keyboard layout tables: X11 keysyms to PC scancodes and to terminal
//! byte sequences.
//!
//! Two consumers:
//!
//!   - the scancode side (modifier tracking, numlock reconciliation, and
//!     raw scancode emission for hosts that want key events rather than
//!     bytes) uses [`keysym_to_scancode`] with set-1 codes; extended keys
//!     carry an `0xE0` prefix in the high byte.
//!   - the terminal side turns keysyms into the byte sequences a Linux
//!     console emits, via [`keysym_to_bytes`].

/// X11 keysym constants used in dispatch (the interesting subset).
pub mod keysym {
    pub const BACKSPACE: u32 = 0xFF08;
    pub const TAB: u32 = 0xFF09;
    pub const RETURN: u32 = 0xFF0D;
    pub const ESCAPE: u32 = 0xFF1B;
    pub const HOME: u32 = 0xFF50;
    pub const LEFT: u32 = 0xFF51;
    pub const UP: u32 = 0xFF52;
    pub const RIGHT: u32 = 0xFF53;
    pub const DOWN: u32 = 0xFF54;
    pub const PAGE_UP: u32 = 0xFF55;
    pub const PAGE_DOWN: u32 = 0xFF56;
    pub const END: u32 = 0xFF57;
    pub const INSERT: u32 = 0xFF63;
    pub const NUM_LOCK: u32 = 0xFF7F;
    pub const KP_ENTER: u32 = 0xFF8D;
    pub const KP_HOME: u32 = 0xFF95;
    pub const KP_LEFT: u32 = 0xFF96;
    pub const KP_UP: u32 = 0xFF97;
    pub const KP_RIGHT: u32 = 0xFF98;
    pub const KP_DOWN: u32 = 0xFF99;
    pub const KP_PAGE_UP: u32 = 0xFF9A;
    pub const KP_PAGE_DOWN: u32 = 0xFF9B;
    pub const KP_END: u32 = 0xFF9C;
    pub const KP_BEGIN: u32 = 0xFF9D;
    pub const KP_INSERT: u32 = 0xFF9E;
    pub const KP_DELETE: u32 = 0xFF9F;
    pub const KP_MULTIPLY: u32 = 0xFFAA;
    pub const KP_ADD: u32 = 0xFFAB;
    pub const KP_SUBTRACT: u32 = 0xFFAD;
    pub const KP_DECIMAL: u32 = 0xFFAE;
    pub const KP_DIVIDE: u32 = 0xFFAF;
    pub const KP_0: u32 = 0xFFB0;
    pub const KP_9: u32 = 0xFFB9;
    pub const F1: u32 = 0xFFBE;
    pub const F5: u32 = 0xFFC2;
    pub const F6: u32 = 0xFFC3;
    pub const F8: u32 = 0xFFC5;
    pub const F9: u32 = 0xFFC6;
    pub const F10: u32 = 0xFFC7;
    pub const F11: u32 = 0xFFC8;
    pub const F14: u32 = 0xFFCB;
    pub const SHIFT_L: u32 = 0xFFE1;
    pub const SHIFT_R: u32 = 0xFFE2;
    pub const CONTROL_L: u32 = 0xFFE3;
    pub const CONTROL_R: u32 = 0xFFE4;
    pub const CAPS_LOCK: u32 = 0xFFE5;
    pub const META_L: u32 = 0xFFE7;
    pub const ALT_L: u32 = 0xFFE9;
    pub const ALT_R: u32 = 0xFFEA;
    pub const DELETE: u32 = 0xFFFF;
}

/// Set-1 scancode of the virtual NumLock key.
pub const SCANCODE_NUMLOCK: u16 = 0x45;

/// Keysym → set-1 scancode; `None` for keysyms with no PC key. Extended
/// keys return `0xE0xx`.
pub fn keysym_to_scancode(keysym: u32) -> Option<u16> {
    use keysym::*;
    // Printable ASCII: normalise shifted pairs onto their physical key.
    if let Some(code) = ascii_scancode(keysym) {
        return Some(code);
    }
    let code: u16 = match keysym {
        ESCAPE => 0x01,
        BACKSPACE => 0x0E,
        TAB => 0x0F,
        RETURN => 0x1C,
        CONTROL_L => 0x1D,
        SHIFT_L => 0x2A,
        SHIFT_R => 0x36,
        KP_MULTIPLY => 0x37,
        ALT_L | META_L => 0x38,
        CAPS_LOCK => 0x3A,
        NUM_LOCK => SCANCODE_NUMLOCK,
        0xFF14 => 0x46, // Scroll_Lock
        0xFFB7 => 0x47, // KP_7
        0xFFB8 => 0x48,
        0xFFB9 => 0x49,
        KP_SUBTRACT => 0x4A,
        0xFFB4 => 0x4B,
        0xFFB5 | KP_BEGIN => 0x4C,
        0xFFB6 => 0x4D,
        KP_ADD => 0x4E,
        0xFFB1 => 0x4F,
        0xFFB2 => 0x50,
        0xFFB3 => 0x51,
        KP_0 => 0x52,
        KP_DECIMAL => 0x53,
        F11 => 0x57,
        0xFFC9 => 0x58, // F12
        KP_ENTER => 0xE01C,
        CONTROL_R => 0xE01D,
        KP_DIVIDE => 0xE035,
        ALT_R => 0xE038,
        HOME | KP_HOME => 0xE047,
        UP | KP_UP => 0xE048,
        PAGE_UP | KP_PAGE_UP => 0xE049,
        LEFT | KP_LEFT => 0xE04B,
        RIGHT | KP_RIGHT => 0xE04D,
        END | KP_END => 0xE04F,
        DOWN | KP_DOWN => 0xE050,
        PAGE_DOWN | KP_PAGE_DOWN => 0xE051,
        INSERT | KP_INSERT => 0xE052,
        DELETE | KP_DELETE => 0xE053,
        f @ F1..=F10 => 0x3B + (f - F1) as u16,
        _ => return None,
    };
    Some(code)
}

fn ascii_scancode(keysym: u32) -> Option<u16> {
    let c = char::from_u32(keysym)?;
    let c = c.to_ascii_lowercase();
    // Shifted symbols fold onto the US-layout key that produces them.
    let c = match c {
        '!' => '1',
        '@' => '2',
        '#' => '3',
        '$' => '4',
        '%' => '5',
        '^' => '6',
        '&' => '7',
        '*' => '8',
        '(' => '9',
        ')' => '0',
        '_' => '-',
        '+' => '=',
        '{' => '[',
        '}' => ']',
        ':' => ';',
        '"' => '\'',
        '~' => '`',
        '|' => '\\',
        '<' => ',',
        '>' => '.',
        '?' => '/',
        other => other,
    };
    let code = match c {
        '1'..='9' => 0x02 + (c as u16 - '1' as u16),
        '0' => 0x0B,
        '-' => 0x0C,
        '=' => 0x0D,
        'q' => 0x10,
        'w' => 0x11,
        'e' => 0x12,
        'r' => 0x13,
        't' => 0x14,
        'y' => 0x15,
        'u' => 0x16,
        'i' => 0x17,
        'o' => 0x18,
        'p' => 0x19,
        '[' => 0x1A,
        ']' => 0x1B,
        'a' => 0x1E,
        's' => 0x1F,
        'd' => 0x20,
        'f' => 0x21,
        'g' => 0x22,
        'h' => 0x23,
        'j' => 0x24,
        'k' => 0x25,
        'l' => 0x26,
        ';' => 0x27,
        '\'' => 0x28,
        '`' => 0x29,
        '\\' => 0x2B,
        'z' => 0x2C,
        'x' => 0x2D,
        'c' => 0x2E,
        'v' => 0x2F,
        'b' => 0x30,
        'n' => 0x31,
        'm' => 0x32,
        ',' => 0x33,
        '.' => 0x34,
        '/' => 0x35,
        ' ' => 0x39,
        _ => return None,
    };
    Some(code)
}

/// True for the modifier keysyms tracked in the server's modifier vector.
pub fn is_modifier_keysym(keysym: u32) -> bool {
    use keysym::*;
    matches!(
        keysym,
        SHIFT_L | SHIFT_R | CONTROL_L | CONTROL_R | ALT_L | ALT_R | META_L | CAPS_LOCK | NUM_LOCK
    )
}

pub fn is_numlock_keysym(keysym: u32) -> bool {
    keysym == keysym::NUM_LOCK
}

/// Keypad keysyms whose meaning flips with NumLock.
pub fn is_keypad_keysym(keysym: u32) -> bool {
    (0xFF95..=0xFF9F).contains(&keysym) || (keysym::KP_0..=keysym::KP_9).contains(&keysym)
}

/// Keypad scancodes (the block NumLock gates on a PC keyboard).
pub fn is_keypad_scancode(code: u16) -> bool {
    (0x47..=0x53).contains(&code)
}

/// Dense index for a scancode into the modifier/key state vector.
pub fn scancode_slot(code: u16) -> usize {
    (usize::from(code) & 0x7F) | if code & 0xE000 != 0 { 0x80 } else { 0 }
}

// ---------------------------------------------------------------------------
// Keysym → terminal bytes
// ---------------------------------------------------------------------------

/// Translate a keysym press into the bytes the terminal host receives.
///
/// `cursorkey_mode` switches arrows between `ESC O X` (application) and
/// `ESC [ X` (cursor). `insert_toggle` is the per-session Insert latch: each
/// press alternates `ESC [ 4 h` and `ESC [ 4 l`. Ctrl folds ASCII into the
/// control range; Alt prefixes ESC.
pub fn keysym_to_bytes(
    sym: u32,
    cursorkey_mode: bool,
    ctrl: bool,
    alt: bool,
    numlock: bool,
    insert_toggle: &mut bool,
) -> Vec<u8> {
    use keysym::*;
    let arrow = |i: usize| {
        let lead = if cursorkey_mode { b'O' } else { b'[' };
        vec![0x1B, lead, b"ABCD"[i]]
    };

    let mut bytes = match sym {
        RETURN | KP_ENTER => vec![b'\r'],
        BACKSPACE => vec![0x7F],
        TAB => vec![b'\t'],
        ESCAPE => vec![0x1B],
        UP => arrow(0),
        DOWN => arrow(1),
        RIGHT => arrow(2),
        LEFT => arrow(3),
        HOME | KP_HOME => b"\x1b[1~".to_vec(),
        END | KP_END => b"\x1b[4~".to_vec(),
        PAGE_UP | KP_PAGE_UP => b"\x1b[5~".to_vec(),
        PAGE_DOWN | KP_PAGE_DOWN => b"\x1b[6~".to_vec(),
        INSERT | KP_INSERT => {
            *insert_toggle = !*insert_toggle;
            if *insert_toggle {
                b"\x1b[4h".to_vec()
            } else {
                b"\x1b[4l".to_vec()
            }
        }
        DELETE | KP_DELETE => b"\x1b[3~".to_vec(),
        f @ F1..=F5 => vec![0x1B, b'[', b'[', b'A' + (f - F1) as u8],
        f @ F6..=F8 => format!("\x1b[1{}~", 7 + (f - F6)).into_bytes(),
        f @ F9..=F10 => format!("\x1b[2{}~", f - F9).into_bytes(),
        f @ F11..=F14 => format!("\x1b[2{}~", 3 + (f - F11)).into_bytes(),
        d @ KP_0..=KP_9 if numlock => vec![b'0' + (d - KP_0) as u8],
        KP_MULTIPLY => vec![b'*'],
        KP_ADD => vec![b'+'],
        KP_SUBTRACT => vec![b'-'],
        KP_DIVIDE => vec![b'/'],
        KP_DECIMAL if numlock => vec![b'.'],
        KP_DECIMAL => b"\x1b[3~".to_vec(),
        // Latin-1 keysyms carry their byte value directly.
        0x20..=0x7E | 0xA0..=0xFF => vec![sym as u8],
        _ => Vec::new(),
    };

    if ctrl && bytes.len() == 1 {
        bytes[0] = match bytes[0] {
            b' ' | b'2' => 0x00,
            c @ (b'a'..=b'z') => c - b'a' + 1,
            c @ 0x40..=0x5F => c & 0x1F,
            b'/' => 0x1F,
            b'?' => 0x7F,
            c => c,
        };
    }
    if alt && !bytes.is_empty() {
        bytes.insert(0, 0x1B);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrows_follow_cursorkey_mode() {
        let mut ins = false;
        assert_eq!(
            keysym_to_bytes(keysym::UP, false, false, false, true, &mut ins),
            b"\x1b[A"
        );
        assert_eq!(
            keysym_to_bytes(keysym::UP, true, false, false, true, &mut ins),
            b"\x1bOA"
        );
    }

    #[test]
    fn function_keys_match_console_sequences() {
        let f = |sym| keysym_to_bytes(sym, false, false, false, true, &mut false);
        assert_eq!(f(keysym::F1), b"\x1b[[A");
        assert_eq!(f(keysym::F5), b"\x1b[[E");
        assert_eq!(f(keysym::F6), b"\x1b[17~");
        assert_eq!(f(keysym::F9), b"\x1b[20~");
        assert_eq!(f(keysym::F10), b"\x1b[21~");
        assert_eq!(f(keysym::F11), b"\x1b[23~");
        assert_eq!(f(keysym::F14), b"\x1b[26~");
    }

    #[test]
    fn insert_alternates_set_and_reset() {
        let mut ins = false;
        assert_eq!(
            keysym_to_bytes(keysym::INSERT, false, false, false, true, &mut ins),
            b"\x1b[4h"
        );
        assert_eq!(
            keysym_to_bytes(keysym::INSERT, false, false, false, true, &mut ins),
            b"\x1b[4l"
        );
    }

    #[test]
    fn ctrl_and_alt_modifiers() {
        let mut ins = false;
        assert_eq!(
            keysym_to_bytes(u32::from(b'c'), false, true, false, true, &mut ins),
            vec![0x03]
        );
        assert_eq!(
            keysym_to_bytes(u32::from(b'x'), false, false, true, true, &mut ins),
            vec![0x1B, b'x']
        );
        assert_eq!(
            keysym_to_bytes(u32::from(b' '), false, true, false, true, &mut ins),
            vec![0x00]
        );
    }

    #[test]
    fn keypad_digits_follow_numlock() {
        let mut ins = false;
        assert_eq!(
            keysym_to_bytes(keysym::KP_0 + 5, false, false, false, true, &mut ins),
            vec![b'5']
        );
        assert!(keysym_to_bytes(keysym::KP_0 + 5, false, false, false, false, &mut ins).is_empty());
        assert_eq!(
            keysym_to_bytes(keysym::KP_HOME, false, false, false, false, &mut ins),
            b"\x1b[1~"
        );
    }

    #[test]
    fn scancode_classification() {
        assert_eq!(keysym_to_scancode(u32::from(b'a')), Some(0x1E));
        assert_eq!(keysym_to_scancode(u32::from(b'A')), Some(0x1E));
        assert_eq!(keysym_to_scancode(keysym::SHIFT_L), Some(0x2A));
        assert_eq!(keysym_to_scancode(keysym::UP), Some(0xE048));
        assert!(is_keypad_scancode(0x47));
        assert!(!is_keypad_scancode(0xE047));
        assert!(is_numlock_keysym(keysym::NUM_LOCK));
    }
}
