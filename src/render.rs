//! Assembly of generated C sources.
//!
//! [`generate`] runs the code generator over the entry types and lays the
//! results out as three files: the C implementation, a header with the public
//! API, and a header with the type definitions.  Functions are emitted in
//! dependency order and pruned to the set actually reachable from the entry
//! points.

use crate::codegen::{prepare, Gen, Mode, TypeDef, Xcoder};
use crate::schema::{SchemaElement, SymbolTable};
use crate::util::{CompileError, CompileResult};

/// The three generated source files.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    /// C implementation file.
    pub c_file: String,
    /// Header declaring the public API.
    pub h_file: String,
    /// Header with the result struct definitions.
    pub types_file: String,
}

/// Generate C encoding or decoding sources for the given entry types.
pub fn generate(
    table: &SymbolTable,
    mode: Mode,
    entry_types: &[String],
    default_max_qty: u64,
    h_file_name: &str,
    types_file_name: &str,
) -> CompileResult<GeneratedCode> {
    for name in entry_types {
        table.lookup(name)?;
    }
    let prepped = prepare(table, mode, entry_types)?;
    let gen = Gen {
        table: &prepped,
        mode,
        entry_types,
    };

    // Emit shallow types before the types that contain them.
    let mut entries: Vec<(&str, &SchemaElement)> = Vec::new();
    for name in entry_types {
        entries.push((name, prepped.lookup(name)?));
    }
    entries.sort_by_key(|(_, elem)| gen.depends_on(elem, &mut Vec::new()));

    let mut entry_funcs = Vec::new();
    let mut funcs = Vec::new();
    let mut type_defs = Vec::new();
    for (_, elem) in &entries {
        gen.xcoders(elem, &mut funcs)?;
        entry_funcs.push(Xcoder {
            body: gen.xcode(elem)?,
            func_name: gen.xcode_func_name(elem),
            type_name: gen.type_name(elem),
        });
        type_defs.extend(gen.type_def(elem));
    }
    let funcs = unique_funcs(funcs)?;
    let funcs = used_funcs(funcs, &entry_funcs);
    let type_defs = unique_types(type_defs)?;

    let functions: Vec<String> = funcs.iter().map(|f| render_function(f, mode)).collect();
    let mut entry_sections = Vec::new();
    for (_, elem) in &entries {
        entry_sections.push(render_entry_function(&gen, elem)?);
    }

    Ok(GeneratedCode {
        c_file: render_c_file(mode, h_file_name, default_max_qty, &functions, &entry_sections),
        h_file: render_h_file(&gen, mode, h_file_name, types_file_name, &entries)?,
        types_file: render_type_file(mode, types_file_name, default_max_qty, &type_defs),
    })
}

// Same function name with two different bodies means the schema produced
// colliding identifiers.
fn unique_funcs(funcs: Vec<Xcoder>) -> CompileResult<Vec<Xcoder>> {
    let mut out: Vec<Xcoder> = Vec::new();
    for func in funcs {
        match out.iter().find(|f| f.func_name == func.func_name) {
            None => out.push(func),
            Some(existing) if existing.body == func.body => {}
            Some(_) => {
                return Err(CompileError::Generator(format!(
                    "function {} has two different implementations",
                    func.func_name
                )))
            }
        }
    }
    Ok(out)
}

fn unique_types(types: Vec<TypeDef>) -> CompileResult<Vec<TypeDef>> {
    let mut out: Vec<TypeDef> = Vec::new();
    for def in types {
        match out.iter().find(|t| t.name == def.name) {
            None => out.push(def),
            Some(existing) if existing.lines == def.lines => {}
            Some(_) => {
                return Err(CompileError::Generator(format!(
                    "type {} has two different definitions",
                    def.name
                )))
            }
        }
    }
    Ok(out)
}

// `name` followed by a non-identifier character (or the end of the text),
// anywhere in `code`.
fn mentions(code: &str, name: &str) -> bool {
    let code = code.as_bytes();
    let name = name.as_bytes();
    let mut start = 0;
    while start + name.len() <= code.len() {
        match code[start..].windows(name.len()).position(|w| w == name) {
            Some(pos) => {
                let after = start + pos + name.len();
                match code.get(after) {
                    Some(b) if !(b.is_ascii_alphanumeric() || *b == b'_') => return true,
                    Some(_) => start = start + pos + 1,
                    None => return true,
                }
            }
            None => return false,
        }
    }
    false
}

// Drop functions nothing reachable from the entry points refers to.  The
// function list is in dependency order, so a single reverse sweep finds the
// transitive closure.
fn used_funcs(funcs: Vec<Xcoder>, entry_funcs: &[Xcoder]) -> Vec<Xcoder> {
    let mut reachable: String = entry_funcs.iter().map(|f| f.body.as_str()).collect();
    let mut kept = Vec::new();
    for func in funcs.into_iter().rev() {
        let is_entry = entry_funcs.iter().any(|e| e.func_name == func.func_name);
        if is_entry || mentions(&reachable, &func.func_name) {
            reachable.push_str(&func.body);
            kept.push(func);
        }
    }
    kept.reverse();
    // A trivial entry type may not have produced its own function, but the
    // public wrapper still calls it.
    for entry in entry_funcs {
        if !kept.iter().any(|f| f.func_name == entry.func_name) {
            kept.push(entry.clone());
        }
    }
    kept
}

fn render_function(func: &Xcoder, mode: Mode) -> String {
    let ptr = mode.struct_ptr();
    let struct_const = match mode {
        Mode::Decode => "",
        Mode::Encode => "const ",
    };
    let ptr_type = if mentions(&func.body, ptr) {
        func.type_name.as_deref().unwrap_or("void")
    } else {
        "void"
    };
    let mut lines = vec![
        String::new(),
        format!(
            "static bool {}(\n\t\tcbor_state_t *state, {}{} *{})",
            func.func_name, struct_const, ptr_type, ptr
        ),
        "{".to_string(),
        "\tcbor_print(\"%s\\n\", __func__);".to_string(),
    ];
    for (needle, decl) in [
        ("tmp_value", "\tuint32_t tmp_value;"),
        ("tmp_str", "\tcbor_string_type_t tmp_str;"),
        ("int_res", "\tbool int_res;"),
    ] {
        if func.body.contains(needle) {
            lines.push(decl.to_string());
        }
    }
    lines.push(format!("\tbool tmp_result = ({});", func.body));
    lines.push(String::new());
    lines.push("\tif (!tmp_result)".to_string());
    lines.push("\t\tcbor_trace();".to_string());
    lines.push(String::new());
    lines.push("\treturn tmp_result;".to_string());
    lines.push("}".to_string());
    lines.join("\n")
}

fn render_entry_function(gen: &Gen, elem: &SchemaElement) -> CompileResult<String> {
    let func = gen.xcode_func_name(elem);
    let ptr = gen.mode.struct_ptr();
    let (_, max_count) = gen.list_counts(elem);
    Ok(format!(
        "{type_test_sig}\n{{\n\t/* Dummy function to make sure the struct \
         type matches the function. */\n\treturn {func}(NULL, {ptr});\n}}\n\n\
         {public_sig}\n{{\n\treturn entry_function(payload, payload_len, \
         (const void *){ptr},\n\t\tpayload_len_out, (void *){func}, \
         {max_count}, {backups});\n}}",
        type_test_sig = gen.type_test_func_sig(elem)?,
        public_sig = gen.public_func_sig(elem)?,
        func = func,
        ptr = ptr,
        max_count = max_count,
        backups = gen.num_backups(elem)
    ))
}

fn header_guard(file_name: &str) -> String {
    let base: String = file_name
        .chars()
        .map(|c| match c {
            '.' | '-' | '/' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    format!("{}__", base)
}

fn common_includes(mode: Mode) -> String {
    format!(
        "#include <stdint.h>\n#include <stdbool.h>\n#include <stddef.h>\n\
         #include <string.h>\n#include \"cbor_{}.h\"",
        mode.label()
    )
}

fn render_c_file(
    mode: Mode,
    h_file_name: &str,
    default_max_qty: u64,
    functions: &[String],
    entry_sections: &[String],
) -> String {
    format!(
        "/*\n * Generated from CDDL. Do not edit by hand.\n */\n\n{includes}\n\
         #include \"{h}\"\n\n\
         #if DEFAULT_MAX_QTY != {qty}\n\
         #error \"The type file was generated with a different default_max_qty \
         than this file\"\n\
         #endif\n\n{funcs}\n\n\n{entries}\n",
        includes = common_includes(mode),
        h = h_file_name,
        qty = default_max_qty,
        funcs = functions.join("\n"),
        entries = entry_sections.join("\n\n")
    )
}

fn render_h_file(
    gen: &Gen,
    mode: Mode,
    h_file_name: &str,
    types_file_name: &str,
    entries: &[(&str, &SchemaElement)],
) -> CompileResult<String> {
    let guard = header_guard(h_file_name);
    let mut sigs = Vec::new();
    for (_, elem) in entries {
        sigs.push(format!("{};", gen.public_func_sig(elem)?));
    }
    Ok(format!(
        "/*\n * Generated from CDDL. Do not edit by hand.\n */\n\n\
         #ifndef {guard}\n#define {guard}\n\n{includes}\n\
         #include \"{types}\"\n\n{sigs}\n\n#endif /* {guard} */\n",
        guard = guard,
        includes = common_includes(mode),
        types = types_file_name,
        sigs = sigs.join("\n\n")
    ))
}

fn render_type_file(
    mode: Mode,
    types_file_name: &str,
    default_max_qty: u64,
    type_defs: &[TypeDef],
) -> String {
    let guard = header_guard(types_file_name);
    let rendered: Vec<String> = type_defs
        .iter()
        .map(|def| format!("{} {{\n{};", def.name, def.lines[1..].join("\n")))
        .collect();
    format!(
        "/*\n * Generated from CDDL. Do not edit by hand.\n */\n\n\
         #ifndef {guard}\n#define {guard}\n\n{includes}\n\n\
         #define DEFAULT_MAX_QTY {qty}\n\n{types}\n\n#endif /* {guard} */\n",
        guard = guard,
        includes = common_includes(mode),
        qty = default_max_qty,
        types = rendered.join("\n\n")
    )
}
