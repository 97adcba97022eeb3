//! # Traced Function Discovery and Address Translation
//!
//! Attach-time setup needs two things from the target binary:
//!
//! - **Uprobe offsets**: where in the *file* each function starts. The kernel
//!   attaches a uprobe to `(inode, file offset)`, so the probe fires in every
//!   process that maps the binary.
//! - **Runtime addresses** (name lookup policy only): the instruction pointer
//!   the probe will report, used as the `FUNC_NAMES` key.
//!
//! ## Symbol Address → File Offset
//!
//! ```text
//! file_offset = st_value - section.sh_addr + section.sh_offset
//! ```
//!
//! for the executable section that contains the symbol.
//!
//! ## File Offset → Runtime Address
//!
//! Non-PIE executables run at their link address, so the symbol value is the
//! runtime address. PIE executables are relocated by ASLR; the load address is
//! recovered from the executable mappings in `/proc/<pid>/maps`:
//!
//! ```text
//! runtime = mapping.start + (file_offset - mapping.offset)
//! ```
//!
//! ## Module Structure
//!
//! - **`symtab`**: ELF symbol enumeration, filtering, cookie assignment
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing and relocation

pub mod memory_maps;
pub mod symtab;

pub use memory_maps::{read_exec_mappings, runtime_address, ExecMapping};
pub use symtab::{discover_functions, BinaryImage, SymbolFilter, TracedFunction};
