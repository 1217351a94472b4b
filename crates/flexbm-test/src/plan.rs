//! Command plan builder
//!
//! Object names are written verbatim, so callers choose the `old_`/`new_`
//! prefix of every token (or leave it off to exercise prefix checks).

/// Builds plan text one command per line
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    lines: Vec<String>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw line
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn comment(self, text: &str) -> Self {
        self.line(format!("# {text}"))
    }

    pub fn blank(self) -> Self {
        self.line("")
    }

    pub fn insert_cond(self, pipeline: &str, node: &str) -> Self {
        self.line(format!("insert cond {pipeline} {node}"))
    }

    pub fn insert_flex(
        self,
        pipeline: &str,
        node: &str,
        false_next: &str,
        true_next: &str,
    ) -> Self {
        self.line(format!(
            "insert flex {pipeline} {node} {false_next} {true_next}"
        ))
    }

    /// `branch` is `true_next` or `false_next`
    pub fn change_cond(self, pipeline: &str, node: &str, branch: &str, target: &str) -> Self {
        self.line(format!("change cond {pipeline} {node} {branch} {target}"))
    }

    pub fn change_flex(self, pipeline: &str, node: &str, branch: &str, target: &str) -> Self {
        self.line(format!("change flex {pipeline} {node} {branch} {target}"))
    }

    pub fn delete_cond(self, pipeline: &str, node: &str) -> Self {
        self.line(format!("delete cond {pipeline} {node}"))
    }

    pub fn delete_flex(self, pipeline: &str, node: &str) -> Self {
        self.line(format!("delete flex {pipeline} {node}"))
    }

    pub fn insert_table(self, pipeline: &str, table: &str) -> Self {
        self.line(format!("insert tabl {pipeline} {table}"))
    }

    /// `selector` is an action name, `__HIT__`, `__MISS__` or
    /// `base_default_next`
    pub fn change_table(self, pipeline: &str, table: &str, selector: &str, target: &str) -> Self {
        self.line(format!("change tabl {pipeline} {table} {selector} {target}"))
    }

    pub fn delete_table(self, pipeline: &str, table: &str) -> Self {
        self.line(format!("delete tabl {pipeline} {table}"))
    }

    pub fn insert_register_array(self, name: &str, size: usize, bitwidth: u32) -> Self {
        self.line(format!("insert register_array {name} {size} {bitwidth}"))
    }

    pub fn resize_register_array(self, name: &str, size: usize) -> Self {
        self.line(format!("change register_array_size {name} {size}"))
    }

    pub fn rewiden_register_array(self, name: &str, bitwidth: u32) -> Self {
        self.line(format!("change register_array_bitwidth {name} {bitwidth}"))
    }

    pub fn delete_register_array(self, name: &str) -> Self {
        self.line(format!("delete register_array {name}"))
    }

    /// Full rehash line with the standard flag spelling
    #[allow(clippy::too_many_arguments)]
    pub fn rehash(
        self,
        target: &str,
        recording: &str,
        last_pos: &str,
        counting: &str,
        counting_hash: &str,
        target_hashes: [&str; 3],
        reset: &str,
    ) -> Self {
        let [a, b, c] = target_hashes;
        self.line(format!(
            "rehash register_array {target} --according-to {recording} {last_pos} {counting} \
             --hash-function-for-counting {counting_hash} \
             --hash-function-for-target {a} {b} {c} --reset {reset}"
        ))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Plan text, newline terminated
    pub fn build(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_plan() {
        let plan = PlanBuilder::new()
            .comment("grow the filter")
            .insert_register_array("new_R", 128, 32)
            .blank()
            .change_cond("ingress", "old_node_4", "true_next", "null");
        assert_eq!(plan.len(), 4);
        assert_eq!(
            plan.build(),
            "# grow the filter\n\
             insert register_array new_R 128 32\n\
             \n\
             change cond ingress old_node_4 true_next null\n"
        );
    }

    #[test]
    fn test_rehash_line_has_fifteen_tokens() {
        let plan = PlanBuilder::new().rehash(
            "old_T",
            "old_A",
            "old_B",
            "old_C",
            "crc32",
            ["crc16", "identity", "csum16"],
            "old_D",
        );
        let text = plan.build();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(tokens.len(), 15);
        assert_eq!(tokens[3], "--according-to");
        assert_eq!(tokens[13], "--reset");
    }
}
