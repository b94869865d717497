use std::collections::{HashSet, VecDeque};

use crate::{
    dtd::{Dtd, ElementDecl, Group, GroupConnector, GroupMember},
    reader::{Pending, SgmlReader},
};

/// What the parser wants to place at the current position.
#[derive(Debug, Clone, Copy)]
pub(crate) enum InferTarget<'a> {
    /// Uppercase element name.
    Element(&'a str),
    Text,
}

impl InferTarget<'_> {
    fn accepted_by(&self, decl: &ElementDecl) -> bool {
        match *self {
            InferTarget::Element(name) => decl.can_contain(name),
            InferTarget::Text => decl.can_contain_text(),
        }
    }
}

/// Outcome of placement planning for a start tag.
#[derive(Debug)]
pub(crate) enum StartPlan {
    /// Legal at the current position (possibly after the queued synthetic
    /// events).
    Emit(VecDeque<Pending>),
    /// Strict conformance: a second top-level element forces EOF.
    SecondRoot,
    /// The DTD names a root whose start tag is required, and this is not it.
    RejectRoot,
}

/// Outcome of placement planning for character data.
#[derive(Debug)]
pub(crate) enum TextPlan {
    Emit(VecDeque<Pending>),
    Drop,
}

/// A synthetic step discovered while walking a content model.
enum Synth {
    /// Open an optional-start-tag container and descend into it.
    Open(String),
    /// A required sequence member with optional start and end tags that the
    /// target cannot live in: open and immediately close it.
    EmptyElement(String),
}

enum Step {
    Allowed(Vec<Synth>),
    NotAllowed,
}

impl SgmlReader {
    /// Decide how a start tag for `upper` (uppercase) fits at the current
    /// position, synthesizing container chains (§ start-tag inference) and
    /// auto-close events as needed.
    pub(crate) fn plan_start(&self, upper: &str) -> StartPlan {
        let Some(dtd) = self.dtd.as_deref() else {
            return StartPlan::Emit(VecDeque::new());
        };

        let mut actions = VecDeque::new();
        // Virtual frames appended on top of the real stack while planning:
        // (uppercase declaration key, virtual model position).
        let mut virt: Vec<String> = Vec::new();

        loop {
            if self.stack.count() + virt.len() == 1 {
                // Document level: only the root may start here.
                if self.root_emitted && !self.fragment {
                    return StartPlan::SecondRoot;
                }
                let root = dtd.name().to_ascii_uppercase();
                if upper == root {
                    return StartPlan::Emit(actions);
                }
                let Some(root_decl) = dtd.find_element(&root) else {
                    // The DTD names no usable root; nothing to infer against.
                    return StartPlan::Emit(actions);
                };
                if root_decl.start_tag_optional {
                    actions.push_back(Pending::Open {
                        name: self.fold_name(&root),
                        simulated: true,
                    });
                    virt.push(root);
                    continue;
                }
                return StartPlan::RejectRoot;
            }

            let (decl_key, model_pos) = self.planning_top(&virt);
            let (excluded, included) = if virt.is_empty() {
                let top = self.stack.top().expect("document frame is always present");
                (
                    top.excluded.contains(upper),
                    top.included.contains(upper) && !top.excluded.contains(upper),
                )
            } else {
                (false, false)
            };
            if excluded {
                // Inherited exclusion: the element cannot live anywhere in
                // this subtree; fall through to the auto-close walk.
            } else if included {
                return StartPlan::Emit(actions);
            } else {
                let Some(decl) = decl_key.as_deref().and_then(|k| dtd.find_element(k)) else {
                    // Unknown element: validation is skipped below it.
                    return StartPlan::Emit(actions);
                };
                match step_into(dtd, decl, model_pos, InferTarget::Element(upper)) {
                    Step::Allowed(synths) => {
                        self.push_synths(&mut actions, synths);
                        return StartPlan::Emit(actions);
                    }
                    Step::NotAllowed => {}
                }
            }

            if virt.is_empty() {
                return self.plan_auto_close(dtd, upper, actions);
            }
            // The target cannot live under the synthetic chain either; place
            // it there anyway rather than discard input.
            return StartPlan::Emit(actions);
        }
    }

    /// Decide how character data fits at the current position.
    pub(crate) fn plan_text(&self) -> TextPlan {
        let Some(dtd) = self.dtd.as_deref() else {
            return TextPlan::Emit(VecDeque::new());
        };

        let mut actions = VecDeque::new();
        let mut virt: Vec<String> = Vec::new();
        loop {
            if self.stack.count() + virt.len() == 1 {
                if self.root_emitted && !self.fragment {
                    return TextPlan::Drop;
                }
                let root = dtd.name().to_ascii_uppercase();
                let Some(root_decl) = dtd.find_element(&root) else {
                    return TextPlan::Emit(actions);
                };
                if !root_decl.start_tag_optional {
                    return TextPlan::Drop;
                }
                actions.push_back(Pending::Open {
                    name: self.fold_name(&root),
                    simulated: true,
                });
                virt.push(root);
                continue;
            }

            let (decl_key, model_pos) = self.planning_top(&virt);
            let Some(decl) = decl_key.as_deref().and_then(|k| dtd.find_element(k)) else {
                return TextPlan::Emit(actions);
            };
            if decl.can_contain_text() {
                return TextPlan::Emit(actions);
            }
            return match step_into(dtd, decl, model_pos, InferTarget::Text) {
                Step::Allowed(synths) => {
                    self.push_synths(&mut actions, synths);
                    TextPlan::Emit(actions)
                }
                Step::NotAllowed => TextPlan::Drop,
            };
        }
    }

    /// The effective top of the stack during planning, accounting for
    /// virtual frames: (declaration key, model position). Virtual frames
    /// start at model position 0; their declaration-level inclusions are
    /// consulted by `step_into` directly.
    fn planning_top(&self, virt: &[String]) -> (Option<String>, usize) {
        if let Some(key) = virt.last() {
            return (Some(key.clone()), 0);
        }
        let top = self.stack.top().expect("document frame is always present");
        (top.dtd_type.clone(), top.model_pos)
    }

    fn push_synths(&self, actions: &mut VecDeque<Pending>, synths: Vec<Synth>) {
        for synth in synths {
            match synth {
                Synth::Open(name) => {
                    actions.push_back(Pending::Open {
                        name: self.fold_name(&name),
                        simulated: true,
                    });
                }
                Synth::EmptyElement(name) => {
                    actions.push_back(Pending::Open {
                        name: self.fold_name(&name),
                        simulated: true,
                    });
                    actions.push_back(Pending::Close { simulated: true });
                }
            }
        }
    }

    /// The inbound element is disallowed at the top: walk up the stack for an
    /// ancestor that accepts it, closing intervening elements whose end tags
    /// are optional. An element with a required end tag blocks the walk, as
    /// does the BODY frame at depth 2, which persists until an explicit close
    /// or EOF.
    fn plan_auto_close(
        &self,
        dtd: &Dtd,
        upper: &str,
        mut actions: VecDeque<Pending>,
    ) -> StartPlan {
        let count = self.stack.count();
        for target in (1..count.saturating_sub(1)).rev() {
            // Every frame above the candidate must be closable.
            let mut blocked = false;
            for i in (target + 1)..count {
                let frame = self.stack.get(i).expect("frame in range");
                if i == 2 && frame.name.eq_ignore_ascii_case("BODY") {
                    blocked = true;
                    break;
                }
                let closable = match frame.dtd_type.as_deref().and_then(|k| dtd.find_element(k)) {
                    Some(decl) => decl.end_tag_optional,
                    // Unknown elements do not block recovery.
                    None => true,
                };
                if !closable {
                    blocked = true;
                    break;
                }
            }
            if blocked {
                break;
            }

            let frame = self.stack.get(target).expect("frame in range");
            if frame.excluded.contains(upper) {
                continue;
            }
            let accepts = if frame.included.contains(upper) {
                Some(Vec::new())
            } else {
                match frame.dtd_type.as_deref().and_then(|k| dtd.find_element(k)) {
                    None => Some(Vec::new()),
                    Some(decl) => {
                        match step_into(dtd, decl, frame.model_pos, InferTarget::Element(upper)) {
                            Step::Allowed(synths) => Some(synths),
                            Step::NotAllowed => None,
                        }
                    }
                }
            };
            if let Some(synths) = accepts {
                for _ in target..count - 1 {
                    actions.push_back(Pending::Close { simulated: true });
                }
                self.push_synths(&mut actions, synths);
                return StartPlan::Emit(actions);
            }
        }

        // No ancestor accepts it: the element is retained where it is.
        StartPlan::Emit(actions)
    }
}

/// Can this member be satisfied by nothing at all?
fn member_skippable(member: &GroupMember) -> bool {
    match member {
        GroupMember::Symbol { occurrence, .. } => occurrence.is_optional(),
        GroupMember::Group(group) => {
            group.occurrence.is_optional()
                || match group.connector {
                    GroupConnector::Or => group.members.iter().any(member_skippable),
                    _ => group.members.iter().all(member_skippable),
                }
        }
    }
}

fn member_matches(member: &GroupMember, target: InferTarget<'_>) -> bool {
    match target {
        InferTarget::Element(name) => member.matches(name),
        InferTarget::Text => match member {
            GroupMember::Symbol { .. } => false,
            GroupMember::Group(group) => group.can_contain_text(),
        },
    }
}

/// Whether (and how) `target` can start inside `decl` at sequence position
/// `pos`.
///
/// For `,`-connected groups the members are walked in order from the
/// position cursor: a match wins; an optional-start container reachable
/// inside the member contributes an `Open` chain; skippable members are
/// passed over; a required member with fully optional tags that cannot hold
/// the target is emitted as an empty element. Other connectors reduce to a
/// membership test plus the container search.
fn step_into(dtd: &Dtd, decl: &ElementDecl, pos: usize, target: InferTarget<'_>) -> Step {
    let model = &decl.content_model;
    if model.any {
        return Step::Allowed(Vec::new());
    }
    if let InferTarget::Element(name) = target
        && decl.inclusions.contains(name)
        && !decl.exclusions.contains(name)
    {
        return Step::Allowed(Vec::new());
    }

    let group = &model.group;
    if group.connector != GroupConnector::Sequence {
        let direct = match target {
            InferTarget::Element(name) => model.can_contain(name),
            InferTarget::Text => model.can_contain_text(),
        };
        if direct {
            return Step::Allowed(Vec::new());
        }
        if let Some(chain) = find_optional_containers(dtd, group, target) {
            return Step::Allowed(chain.into_iter().map(Synth::Open).collect());
        }
        return Step::NotAllowed;
    }

    let mut synths = Vec::new();
    for member in group.members.iter().skip(pos) {
        if member_matches(member, target) {
            return Step::Allowed(synths);
        }
        let member_group = singleton_group(member);
        if let Some(chain) = find_optional_containers(dtd, &member_group, target) {
            synths.extend(chain.into_iter().map(Synth::Open));
            return Step::Allowed(synths);
        }
        if member_skippable(member) {
            continue;
        }
        if let GroupMember::Symbol { name, .. } = member
            && let Some(member_decl) = dtd.find_element(name)
            && member_decl.start_tag_optional
            && member_decl.end_tag_optional
        {
            synths.push(Synth::EmptyElement(name.clone()));
            continue;
        }
        break;
    }

    // Out-of-order but present somewhere in the model: tolerate it rather
    // than spiral into recovery.
    let loose = match target {
        InferTarget::Element(name) => group.can_contain(name),
        InferTarget::Text => group.can_contain_text(),
    };
    if loose {
        Step::Allowed(Vec::new())
    } else {
        Step::NotAllowed
    }
}

/// Wrap a single member so the breadth-first search can treat it as a group.
fn singleton_group(member: &GroupMember) -> Group {
    match member {
        GroupMember::Group(group) => group.clone(),
        GroupMember::Symbol { name, occurrence } => Group {
            members: vec![GroupMember::Symbol {
                name: name.clone(),
                occurrence: *occurrence,
            }],
            ..Default::default()
        },
    }
}

/// Breadth-first search for the shortest chain of optional-start-tag
/// elements leading from the candidates in `from` down to one that accepts
/// `target`. Each element declaration is visited at most once per
/// invocation, which bounds the search on cyclic models.
fn find_optional_containers(
    dtd: &Dtd,
    from: &Group,
    target: InferTarget<'_>,
) -> Option<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Vec<String>> = VecDeque::new();

    let mut seed = Vec::new();
    collect_symbols(from, &mut seed);
    for name in seed {
        if visited.insert(name.clone()) {
            queue.push_back(vec![name]);
        }
    }

    while let Some(chain) = queue.pop_front() {
        let name = chain.last().expect("chains are non-empty");
        let Some(decl) = dtd.find_element(name) else {
            continue;
        };
        if !decl.start_tag_optional {
            continue;
        }
        if target.accepted_by(decl) {
            return Some(chain);
        }
        let mut children = Vec::new();
        collect_symbols(&decl.content_model.group, &mut children);
        for child in children {
            if visited.insert(child.clone()) {
                let mut next = chain.clone();
                next.push(child);
                queue.push_back(next);
            }
        }
    }
    None
}

fn collect_symbols(group: &Group, out: &mut Vec<String>) {
    for member in &group.members {
        match member {
            GroupMember::Symbol { name, .. } => out.push(name.clone()),
            GroupMember::Group(nested) => collect_symbols(nested, out),
        }
    }
}
