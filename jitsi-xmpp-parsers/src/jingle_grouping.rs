use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

use crate::ns::JINGLE_GROUPING;

generate_attribute!(
  /// The semantics of the grouping.
  GroupSemantics, "semantics", {
    /// Lip synchronization.
    LipSync => "LS",

    /// Bundle media streams.
    Bundle => "BUNDLE",
  }
);

/// A list of contents bundled together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
  pub semantics: GroupSemantics,

  /// Names of the grouped contents.
  pub contents: Vec<String>,
}

impl TryFrom<Element> for Group {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Group, Error> {
    check_self!(elem, "group", [JINGLE_GROUPING]);
    check_attributes!(elem, "group", ["semantics"]);
    let semantics = get_attr!(elem, "semantics", RequiredParse);
    let mut contents = vec![];
    for child in elem.children() {
      if child.name() == "content" {
        if let Some(name) = child.attr("name") {
          contents.push(name.to_owned());
        }
      }
      else {
        tracing::debug!("ignoring unknown child <{}> of <group>", child.name());
      }
    }
    Ok(Group {
      semantics,
      contents,
    })
  }
}

impl From<Group> for Element {
  fn from(group: Group) -> Element {
    Element::builder("group")
      .ns(JINGLE_GROUPING)
      .attr("semantics", group.semantics)
      .append_all(group.contents.into_iter().map(|name| {
        Element::builder("content")
          .ns(JINGLE_GROUPING)
          .attr("name", name)
          .build()
      }))
      .build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bundle() {
    let elem: Element = r#"<group xmlns="urn:xmpp:jingle:apps:grouping:0" semantics="BUNDLE"><content name="audio"/><content name="video"/><content/></group>"#
      .parse()
      .unwrap();
    let group = Group::try_from(elem).unwrap();
    assert_eq!(group.semantics, GroupSemantics::Bundle);
    assert_eq!(group.contents, vec!["audio".to_owned(), "video".to_owned()]);
  }

  #[test]
  fn unknown_semantics() {
    let elem: Element = r#"<group xmlns="urn:xmpp:jingle:apps:grouping:0" semantics="bundle"/>"#
      .parse()
      .unwrap();
    assert!(Group::try_from(elem).is_err());
  }
}
