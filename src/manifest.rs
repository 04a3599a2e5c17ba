use crate::lower::KernelSpec;

/// JSON description of `specs`, for bindings that load the built library.
pub fn generate_json(specs: &[KernelSpec], library: &str) -> String {
    let mut out = String::new();
    out.push_str("{\n");
    out.push_str(&format!("  \"library\": \"{}\",\n", json_escape(library)));

    out.push_str("  \"kernels\": [");
    for (k, spec) in specs.iter().enumerate() {
        if k > 0 {
            out.push(',');
        }
        out.push_str("\n    {\n");
        out.push_str(&format!("      \"name\": \"{}\",\n", json_escape(&spec.name)));
        out.push_str(&format!("      \"dtype\": \"{}\",\n", spec.dtype.numpy_name()));
        out.push_str(&format!("      \"rank\": {},\n", spec.rank));
        out.push_str("      \"operands\": [");
        for (i, operand) in spec.operands.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("\"{}\"", json_escape(operand)));
        }
        out.push_str("],\n");
        out.push_str(&format!(
            "      \"combiner\": \"{}\",\n",
            json_escape(&spec.combiner.to_string())
        ));
        out.push_str(&format!("      \"output\": \"{}\",\n", spec.output.name()));
        match spec.return_type() {
            Some(ty) => out.push_str(&format!(
                "      \"return_type\": \"{}\"\n",
                json_escape(&ty.to_string())
            )),
            None => out.push_str("      \"return_type\": null\n"),
        }
        out.push_str("    }");
    }
    if !specs.is_empty() {
        out.push('\n');
        out.push_str("  ");
    }
    out.push_str("]\n");

    out.push_str("}\n");
    out
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
